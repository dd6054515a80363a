// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Surfaces shared as GL textures between contexts of one share group.
//!
//! Ownership moves through a keyed mutex: the producer holds it from acquire to release and a
//! consumer takes it to sample. Releases publish a fence so consumers never read a texture the
//! GPU is still writing.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{ColorAttachment, DepthStencilBuffers, PlatformSurface};
use crate::framebuffer::ScopedBindFramebuffer;
use crate::gl::GlDriver;
use crate::platform::surface::TransferDescriptor;
use crate::sync::{self, ConsumerLink, KeyedMutex, SyncPoint, SHARED_KEY};
use crate::texturegl::{Texture, TextureTarget};

use euclid::default::Size2D;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

pub struct SharedTextureSurface {
    platform: PlatformSurface,
    share_group: u64,
    keyed_mutex: Arc<KeyedMutex>,
    release_fence: Arc<SyncPoint>,
}

impl SharedTextureSurface {
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               has_alpha: bool,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<SharedTextureSurface, SurfaceError> {
        let texture = Texture::with_storage(ctx.gl(),
                                            TextureTarget::TextureTarget2D,
                                            size,
                                            has_alpha)?;
        let platform = PlatformSurface::new(ctx, size, ColorAttachment::Texture(texture),
                                            depth_stencil)?;
        Ok(SharedTextureSurface {
            platform,
            share_group: ctx.share_group(),
            keyed_mutex: Arc::new(KeyedMutex::new()),
            release_fence: Arc::new(SyncPoint::new()),
        })
    }

    pub fn platform(&self) -> &PlatformSurface {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut PlatformSurface {
        &mut self.platform
    }

    fn texture(&self) -> &Texture {
        match self.platform.color().texture() {
            Some(texture) => texture,
            None => unreachable!("shared texture surface without a color texture"),
        }
    }

    pub fn producer_acquire(&mut self, _: &GlContext, timeout: Duration) {
        if !self.keyed_mutex.acquire(SHARED_KEY, timeout) {
            sync::abort_on_timeout("a shared texture's keyed mutex", timeout)
        }
    }

    pub fn producer_release(&mut self, ctx: &GlContext) {
        let gl = ctx.gl();
        let fence = if ctx.features().sync { gl.fence_sync() } else { None };
        match fence {
            Some(_) => gl.flush(),
            None => {
                if ctx.features().sync {
                    warn!("SharedTextureSurface: fence creation failed, finishing instead");
                }
                gl.finish()
            }
        }
        if let Some(old_fence) = self.release_fence.replace(fence) {
            gl.delete_sync(old_fence);
        }
        self.keyed_mutex.release(SHARED_KEY);
    }

    /// Makes the producer's own reads wait for its last release.
    pub fn producer_read_acquire(&mut self, ctx: &GlContext, _: Duration) {
        if let Some(fence) = self.release_fence.get() {
            ctx.gl().wait_sync(fence);
        }
    }

    pub fn producer_read_release(&mut self, _: &GlContext) {}

    pub fn copy_from_texture(&mut self, ctx: &GlContext, source: &SharedTextureSurface)
                             -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        let size = self.platform.size();
        {
            let _bind = ScopedBindFramebuffer::bind(gl, source.platform.framebuffer());
            let texture = self.texture();
            let _bound = texture.bind(gl);
            gl.copy_tex_sub_image_2d(texture.target.as_gl_target(),
                                     0,
                                     0,
                                     0,
                                     0,
                                     0,
                                     size.width,
                                     size.height);
        }
        match ctx.take_error() {
            None => Ok(()),
            Some(error) => Err(SurfaceError::Gl(error)),
        }
    }

    pub fn transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        let texture = self.texture();
        Ok(TransferDescriptor::SharedTexture {
            share_group: self.share_group,
            texture: texture.native_texture(),
            target: texture.target,
            size: self.platform.size(),
        })
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        ConsumerLink {
            staging: None,
            release_fence: Some(self.release_fence.clone()),
            keyed_mutex: Some(self.keyed_mutex.clone()),
        }
    }

    /// Waits for a consumer still sampling a recycled surface to let go.
    pub fn wait_for_buffer_ownership(&self, timeout: Duration) {
        if self.keyed_mutex.is_owned() {
            debug!("SharedTextureSurface: waiting for the consumer to release the surface");
        }
        if !self.keyed_mutex.wait_for_ownership(SHARED_KEY, timeout) {
            sync::abort_on_timeout("a recycled surface's keyed mutex", timeout)
        }
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        if let Some(fence) = self.release_fence.take() {
            gl.delete_sync(fence);
        }
        self.platform.destroy(gl)
    }

    pub fn forget(&mut self) {
        self.release_fence.take();
        self.platform.forget()
    }
}

