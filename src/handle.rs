// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Consumer handles to surfaces a factory has issued.
//!
//! A handle never touches GL. Dropping the last clone posts a `RetireEvent` to the issuing
//! factory, which decides on its own thread whether to pool or destroy the surface.
//!
//! Consumer access through `consumer_acquire` belongs to the clone that took it. Other clones,
//! on this thread or another, wait on the surface's keyed mutex like any other consumer.

use crate::error::SurfaceError;
use crate::factory::FactoryId;
use crate::gl::GlFence;
use crate::platform::surface::{Mechanism, TransferDescriptor};
use crate::shared_surface::{SharedSurface, SurfaceId};
use crate::sync::{ConsumerLink, SHARED_KEY};

use crossbeam_channel::Sender;
use euclid::default::Size2D;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Posted when every handle to a surface is gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetireEvent {
    pub surface: SurfaceId,
}

struct Lease {
    surface: SurfaceId,
    factory: FactoryId,
    mechanism: Mechanism,
    size: Size2D<i32>,
    has_alpha: bool,
    premultiplied: bool,
    descriptor: Option<TransferDescriptor>,
    link: ConsumerLink,
    retire: Sender<RetireEvent>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.retire.send(RetireEvent { surface: self.surface }).is_err() {
            debug!("{:?} outlived its factory", self.surface);
        }
    }
}

/// A shareable reference to an issued surface.
pub struct SurfaceHandle {
    lease: Arc<Lease>,
    consumer_owns: AtomicBool,
}

impl Clone for SurfaceHandle {
    /// The clone shares the surface but not this handle's consumer access.
    fn clone(&self) -> SurfaceHandle {
        SurfaceHandle {
            lease: self.lease.clone(),
            consumer_owns: AtomicBool::new(false),
        }
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        self.consumer_release();
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_struct("SurfaceHandle")
                 .field("surface", &self.lease.surface)
                 .field("factory", &self.lease.factory)
                 .field("mechanism", &self.lease.mechanism)
                 .field("size", &self.lease.size)
                 .finish()
    }
}

impl SurfaceHandle {
    pub(crate) fn new(surface: &SharedSurface,
                      factory: FactoryId,
                      premultiplied: bool,
                      retire: Sender<RetireEvent>)
                      -> SurfaceHandle {
        SurfaceHandle {
            lease: Arc::new(Lease {
                surface: surface.id(),
                factory,
                mechanism: surface.mechanism(),
                size: surface.size(),
                has_alpha: surface.has_alpha(),
                premultiplied: premultiplied && surface.has_alpha(),
                descriptor: surface.to_transfer_descriptor().ok(),
                link: surface.consumer_link(),
                retire,
            }),
            consumer_owns: AtomicBool::new(false),
        }
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.lease.surface
    }

    pub fn factory_id(&self) -> FactoryId {
        self.lease.factory
    }

    pub fn mechanism(&self) -> Mechanism {
        self.lease.mechanism
    }

    pub fn size(&self) -> Size2D<i32> {
        self.lease.size
    }

    pub fn has_alpha(&self) -> bool {
        self.lease.has_alpha
    }

    /// Whether colour values in the frame are already multiplied by alpha.
    pub fn is_premultiplied(&self) -> bool {
        self.lease.premultiplied
    }

    pub fn to_transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        match self.lease.descriptor {
            Some(ref descriptor) => Ok(descriptor.clone()),
            None => {
                Err(SurfaceError::Unsupported {
                    mechanism: self.lease.mechanism,
                    operation: "transfer descriptor",
                })
            }
        }
    }

    /// Takes the surface's keyed mutex for sampling, waiting while another clone or the
    /// producer holds it. Always succeeds for mechanisms without one. Returns false on timeout.
    ///
    /// Acquiring again through the clone that already holds the surface is a bug.
    pub fn consumer_acquire(&self, timeout: Duration) -> bool {
        let keyed_mutex = match self.lease.link.keyed_mutex {
            Some(ref keyed_mutex) => keyed_mutex,
            None => return true,
        };
        assert!(!self.consumer_owns.load(Ordering::Acquire),
                "consumer_acquire on {:?} twice through one handle", self.lease.surface);
        if !keyed_mutex.acquire(SHARED_KEY, timeout) {
            return false;
        }
        self.consumer_owns.store(true, Ordering::Release);
        true
    }

    pub fn consumer_release(&self) {
        if !self.consumer_owns.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(ref keyed_mutex) = self.lease.link.keyed_mutex {
            keyed_mutex.release(SHARED_KEY);
        }
    }

    /// Whether this clone holds consumer access.
    pub fn is_consumer_acquired(&self) -> bool {
        self.consumer_owns.load(Ordering::Acquire)
    }

    /// The fence of the producer's most recent release.
    pub fn release_fence(&self) -> Option<GlFence> {
        self.lease.link.release_fence.as_ref().and_then(|sync_point| sync_point.get())
    }

    /// Runs `f` over the read-back pixels, for mechanisms that keep a CPU copy.
    pub fn with_staging<R, F>(&self, f: F) -> Option<R> where F: FnOnce(&[u8]) -> R {
        self.lease.link.staging.as_ref().map(|staging| f(&staging.lock()))
    }

    pub fn ptr_eq(&self, other: &SurfaceHandle) -> bool {
        Arc::ptr_eq(&self.lease, &other.lease)
    }

    /// Live clones of this handle.
    pub fn lease_count(&self) -> usize {
        Arc::strong_count(&self.lease)
    }
}
