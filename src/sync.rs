// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Ownership hand-off primitives shared between producer and consumer threads.

use crate::gl::GlFence;

use log::error;
use parking_lot::{Condvar, Mutex};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The key producer and consumer both use; ownership simply alternates.
pub const SHARED_KEY: u64 = 0;

#[derive(Debug)]
struct KeyedState {
    owned: bool,
    key: u64,
}

/// A mutex that can be acquired on one thread and released on another, and that only grants
/// ownership to callers presenting the key it was last released with.
#[derive(Debug)]
pub struct KeyedMutex {
    state: Mutex<KeyedState>,
    released: Condvar,
}

impl Default for KeyedMutex {
    fn default() -> KeyedMutex {
        KeyedMutex::new()
    }
}

impl KeyedMutex {
    pub fn new() -> KeyedMutex {
        KeyedMutex {
            state: Mutex::new(KeyedState { owned: false, key: SHARED_KEY }),
            released: Condvar::new(),
        }
    }

    /// Waits up to `timeout` for the mutex to be free and released with `key`. Returns false on
    /// timeout.
    pub fn acquire(&self, key: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.owned || state.key != key {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                if !state.owned && state.key == key {
                    break;
                }
                return false;
            }
        }
        state.owned = true;
        true
    }

    /// Releases ownership, making the mutex available to holders of `key`.
    pub fn release(&self, key: u64) {
        let mut state = self.state.lock();
        debug_assert!(state.owned, "releasing a keyed mutex that is not held");
        state.owned = false;
        state.key = key;
        drop(state);
        self.released.notify_all();
    }

    pub fn is_owned(&self) -> bool {
        self.state.lock().owned
    }

    /// Blocks until whoever holds the mutex lets go of it, leaving it unowned.
    pub fn wait_for_ownership(&self, key: u64, timeout: Duration) -> bool {
        if !self.acquire(key, timeout) {
            return false;
        }
        self.release(key);
        true
    }
}

/// The release fence of the most recent `producer_release`, readable from any thread.
#[derive(Debug, Default)]
pub struct SyncPoint {
    fence: Mutex<Option<GlFence>>,
}

impl SyncPoint {
    pub fn new() -> SyncPoint {
        SyncPoint::default()
    }

    /// Stores a new fence and returns the one it replaces, which the caller must delete.
    pub fn replace(&self, fence: Option<GlFence>) -> Option<GlFence> {
        let mut slot = self.fence.lock();
        std::mem::replace(&mut *slot, fence)
    }

    pub fn take(&self) -> Option<GlFence> {
        self.fence.lock().take()
    }

    pub fn get(&self) -> Option<GlFence> {
        *self.fence.lock()
    }
}

/// The pieces of a surface a consumer on another thread may touch.
#[derive(Clone, Debug, Default)]
pub struct ConsumerLink {
    /// CPU copy of the last released frame, for mechanisms that read back.
    pub staging: Option<Arc<Mutex<Vec<u8>>>>,
    pub release_fence: Option<Arc<SyncPoint>>,
    pub keyed_mutex: Option<Arc<KeyedMutex>>,
}

/// Called when an ownership hand-off could not complete in time. Another party is wedged and
/// every later frame would be corrupt, so there is nothing left to do but stop.
pub fn abort_on_timeout(what: &str, timeout: Duration) -> ! {
    error!("Timed out after {:?} waiting for {}; aborting.", timeout, what);
    process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn keyed_mutex_times_out_while_held() {
        let mutex = KeyedMutex::new();
        assert!(mutex.acquire(SHARED_KEY, Duration::from_millis(10)));
        assert!(!mutex.acquire(SHARED_KEY, Duration::from_millis(10)));
        mutex.release(SHARED_KEY);
        assert!(mutex.acquire(SHARED_KEY, Duration::from_millis(10)));
    }

    #[test]
    fn keyed_mutex_only_admits_the_release_key() {
        let mutex = KeyedMutex::new();
        assert!(mutex.acquire(SHARED_KEY, Duration::from_millis(10)));
        mutex.release(1);
        assert!(!mutex.acquire(SHARED_KEY, Duration::from_millis(10)));
        assert!(mutex.acquire(1, Duration::from_millis(10)));
    }

    #[test]
    fn keyed_mutex_hands_off_across_threads() {
        let mutex = Arc::new(KeyedMutex::new());
        assert!(mutex.acquire(SHARED_KEY, Duration::from_secs(1)));

        let consumer = {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let acquired = mutex.acquire(SHARED_KEY, Duration::from_secs(5));
                if acquired {
                    mutex.release(SHARED_KEY);
                }
                acquired
            })
        };
        thread::sleep(Duration::from_millis(20));
        mutex.release(SHARED_KEY);
        assert!(consumer.join().unwrap());
        assert!(!mutex.is_owned());
    }

    #[test]
    fn sync_point_replaces_fences() {
        let point = SyncPoint::new();
        assert_eq!(point.replace(Some(GlFence(1))), None);
        assert_eq!(point.replace(Some(GlFence(2))), Some(GlFence(1)));
        assert_eq!(point.get(), Some(GlFence(2)));
        assert_eq!(point.take(), Some(GlFence(2)));
        assert_eq!(point.get(), None);
    }
}
