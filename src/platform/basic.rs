// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Surfaces shared by reading them back to memory. Works everywhere, costs a full pipeline
//! stall per frame.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{ColorAttachment, DepthStencilBuffers, PlatformSurface};
use crate::framebuffer::ScopedBindFramebuffer;
use crate::geometry;
use crate::gl::{self, GlDriver};
use crate::platform::surface::{Mechanism, TransferDescriptor};
use crate::sync::ConsumerLink;
use crate::texturegl::{Texture, TextureTarget};

use euclid::default::Size2D;
use log::warn;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct BasicSurface {
    platform: PlatformSurface,
    /// RGBA rows, bottom row first, of the last released frame.
    staging: Arc<Mutex<Vec<u8>>>,
}

impl BasicSurface {
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               has_alpha: bool,
               prefer_texture: bool,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<BasicSurface, SurfaceError> {
        let gl = ctx.gl();
        // Without glBlitFramebuffer the only generic copy path draws from a texture.
        let color = if prefer_texture || !ctx.features().framebuffer_blit {
            ColorAttachment::Texture(Texture::with_storage(gl,
                                                           TextureTarget::TextureTarget2D,
                                                           size,
                                                           has_alpha)?)
        } else {
            ColorAttachment::renderbuffer(gl, size, has_alpha)?
        };
        let platform = PlatformSurface::new(ctx, size, color, depth_stencil)?;
        Ok(BasicSurface {
            platform,
            staging: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn platform(&self) -> &PlatformSurface {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut PlatformSurface {
        &mut self.platform
    }

    pub fn producer_acquire(&mut self, _: &GlContext, _: Duration) {}

    /// Finishes rendering and copies the frame into the staging buffer.
    pub fn producer_release(&mut self, ctx: &GlContext) {
        let gl = ctx.gl();
        gl.finish();

        let size = self.platform.size();
        let mut staging = self.staging.lock();
        staging.resize(geometry::rgba_byte_len(size), 0);
        let _bind = ScopedBindFramebuffer::bind(gl, self.platform.framebuffer());
        gl.read_pixels(0, 0, size.width, size.height, gl::RGBA, gl::UNSIGNED_BYTE, &mut staging);
        if let Some(error) = ctx.take_error() {
            warn!("BasicSurface: readback of {}x{} failed: {:#x}", size.width, size.height, error);
        }
    }

    pub fn producer_read_acquire(&mut self, _: &GlContext, _: Duration) {}

    pub fn producer_read_release(&mut self, _: &GlContext) {}

    pub fn transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        Err(SurfaceError::Unsupported {
            mechanism: Mechanism::Basic,
            operation: "transfer descriptor",
        })
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        ConsumerLink {
            staging: Some(self.staging.clone()),
            ..ConsumerLink::default()
        }
    }

    pub fn wait_for_buffer_ownership(&self, _: Duration) {}

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        self.platform.destroy(gl)
    }

    pub fn forget(&mut self) {
        self.platform.forget()
    }
}
