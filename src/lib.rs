// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared drawing surfaces for a WebGL implementation.
//!
//! A rendering context draws into a `ScreenBuffer`, which stands in for the default
//! framebuffer. Each published frame is a `SharedSurface` issued by a `SurfaceFactory` and
//! handed to the compositor as a `SurfaceHandle`. Once every handle is gone the factory pools
//! the surface for reuse.

pub mod blit;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod framebuffer;
pub mod geometry;
pub mod gl;
pub mod handle;
pub mod readback;
pub mod screen;
pub mod shared_surface;
pub mod soft;
pub mod sync;
pub mod texturegl;
pub mod util;

pub mod platform {
    pub mod basic;
    pub mod texture_share;
    #[cfg(all(target_os = "linux", feature = "pixmap"))]
    pub mod linux {
        pub mod surface;
    }
    #[cfg(all(target_os = "macos", feature = "iosurface"))]
    pub mod macos {
        pub mod surface;
    }
    pub mod surface;
}

pub use crate::config::{ContextCaps, SurfaceConfig};
pub use crate::context::{ContextId, ContextObserver, ContextRegistry, GlContext};
pub use crate::error::SurfaceError;
pub use crate::factory::{SurfaceFactory, PoolStats};
pub use crate::handle::SurfaceHandle;
pub use crate::platform::surface::{BackendInfo, Mechanism, TransferDescriptor};
pub use crate::readback::{readback, ReadbackFormat, ReadbackOptions};
pub use crate::screen::{BindTarget, ScreenBuffer};
pub use crate::shared_surface::{AccessState, SharedSurface, SurfaceId};
