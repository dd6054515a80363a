// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tunables for the surface layer and the capabilities requested by the rendering context.

use crate::platform::surface::Mechanism;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attributes the rendering context was created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextCaps {
    pub alpha: bool,
    pub antialias: bool,
    pub depth: bool,
    pub stencil: bool,
    /// Keep the drawing buffer contents across `publish_frame`.
    pub preserve: bool,
    pub premultiplied_alpha: bool,
    /// Requested sample count when `antialias` is set. Clamped to `GL_MAX_SAMPLES`.
    pub samples: u32,
}

impl Default for ContextCaps {
    fn default() -> ContextCaps {
        ContextCaps {
            alpha: true,
            antialias: false,
            depth: true,
            stencil: false,
            preserve: false,
            premultiplied_alpha: true,
            samples: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// How many retired surfaces a factory keeps around for reuse.
    pub recycle_pool_capacity: usize,
    /// Upper bound on a keyed-mutex wait before the process is aborted.
    pub acquire_timeout_ms: u64,
    /// Back basic surfaces with textures instead of renderbuffers.
    pub prefer_texture_color: bool,
    /// Skip capability probing and use this mechanism.
    pub force_mechanism: Option<Mechanism>,
}

impl SurfaceConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for SurfaceConfig {
    fn default() -> SurfaceConfig {
        SurfaceConfig {
            recycle_pool_capacity: 2,
            acquire_timeout_ms: 10_000,
            prefer_texture_color: false,
            force_mechanism: None,
        }
    }
}
