// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Recoverable failures. Programming errors are assertions, not variants here.

use crate::gl::GLenum;
use crate::platform::surface::Mechanism;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    #[error("failed to allocate a {width}x{height} surface")]
    AllocationFailed { width: i32, height: i32 },

    #[error("the GL driver reported GL_OUT_OF_MEMORY")]
    OutOfMemory,

    #[error("framebuffer incomplete (status {0:#x})")]
    IncompleteFramebuffer(GLenum),

    #[error("{width}x{height} exceeds the maximum surface dimension {max}")]
    TooLarge { width: i32, height: i32, max: i32 },

    #[error("{operation} is not supported by the {mechanism:?} mechanism")]
    Unsupported {
        mechanism: Mechanism,
        operation: &'static str,
    },

    #[error("the owning GL context has been lost")]
    ContextLost,

    #[error("GL error {0:#x}")]
    Gl(GLenum),

    #[error("the consumer context is not in the producer's share group")]
    ShareGroupMismatch,

    #[error("destination buffer holds {got} bytes but {needed} are required")]
    BufferTooSmall { needed: usize, got: usize },
}

impl SurfaceError {
    /// Whether retrying with a smaller surface could succeed.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            *self,
            SurfaceError::AllocationFailed { .. }
                | SurfaceError::OutOfMemory
                | SurfaceError::IncompleteFramebuffer(_)
                | SurfaceError::TooLarge { .. }
        )
    }
}
