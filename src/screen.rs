// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The virtual default framebuffer.
//!
//! A rendering context draws into "framebuffer 0". The screen buffer maps that onto the current
//! back surface, or onto a multisampled draw buffer that is resolved into the back surface
//! before anything reads it. Publishing a frame swaps in a fresh back surface and hands the old
//! one to the consumer.

use crate::config::{ContextCaps, SurfaceConfig};
use crate::context::{ContextId, ContextObserver, GlContext};
use crate::error::SurfaceError;
use crate::factory::SurfaceFactory;
use crate::framebuffer::DrawBuffer;
use crate::geometry;
use crate::gl::{self, GLenum, GLint, GLuint};
use crate::handle::SurfaceHandle;
use crate::platform::surface::{BackendInfo, Mechanism};
use crate::shared_surface::SharedSurface;

use euclid::default::Size2D;
use log::{debug, error, warn};
use std::rc::Rc;

/// Which framebuffer binding point a bind request is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindTarget {
    Draw,
    Read,
    Both,
}

pub struct ScreenBuffer {
    owner: ContextId,
    caps: ContextCaps,
    samples: i32,
    factory: SurfaceFactory,
    back: Option<SurfaceHandle>,
    front: Option<SurfaceHandle>,
    draw: Option<DrawBuffer>,
    needs_blit: bool,
    user_draw_fb: GLuint,
    user_read_fb: GLuint,
    internal_draw_fb: GLuint,
    internal_read_fb: GLuint,
    observer: Rc<dyn ContextObserver>,
    lost: bool,
}

impl ScreenBuffer {
    /// Creates the screen buffer and its first back surface, halving `size` as needed. A
    /// failure here is returned rather than reported to `observer`.
    pub fn new(ctx: &GlContext,
               caps: ContextCaps,
               config: SurfaceConfig,
               backend: BackendInfo,
               observer: Rc<dyn ContextObserver>,
               size: Size2D<i32>)
               -> Result<ScreenBuffer, SurfaceError> {
        let mut caps = caps;
        let features = ctx.features();
        let max_samples = ctx.limits().max_samples;
        if caps.antialias &&
                (!features.framebuffer_multisample || !features.framebuffer_blit || max_samples <= 0) {
            debug!("ScreenBuffer: multisampling unavailable; drawing without antialiasing");
            caps.antialias = false;
        }
        let samples = if caps.antialias {
            caps.samples.clamp(1, max_samples as u32) as i32
        } else {
            0
        };

        let factory = SurfaceFactory::new(ctx, backend, caps, config);
        let mut screen = ScreenBuffer {
            owner: ctx.id(),
            caps,
            samples,
            factory,
            back: None,
            front: None,
            draw: None,
            needs_blit: false,
            user_draw_fb: 0,
            user_read_fb: 0,
            internal_draw_fb: 0,
            internal_read_fb: 0,
            observer,
            lost: false,
        };

        match screen.allocate_with_halving(ctx, geometry::clamp_to_min(size)) {
            Ok(_) => Ok(screen),
            Err(error) => {
                screen.destroy(ctx);
                Err(error)
            }
        }
    }

    pub fn caps(&self) -> &ContextCaps {
        &self.caps
    }

    pub fn samples(&self) -> i32 {
        self.samples
    }

    pub fn mechanism(&self) -> Mechanism {
        self.factory.mechanism()
    }

    pub fn factory(&self) -> &SurfaceFactory {
        &self.factory
    }

    pub fn size(&self) -> Size2D<i32> {
        self.back.as_ref().map_or(Size2D::new(0, 0), |back| back.size())
    }

    pub fn back(&self) -> Option<&SurfaceHandle> {
        self.back.as_ref()
    }

    pub fn front(&self) -> Option<&SurfaceHandle> {
        self.front.as_ref()
    }

    pub fn needs_blit(&self) -> bool {
        self.needs_blit
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn has_draw_buffer(&self) -> bool {
        self.draw.is_some()
    }

    /// The framebuffer the driver has bound for drawing, as far as we know.
    pub fn draw_fb(&self) -> GLuint {
        self.internal_draw_fb
    }

    pub fn read_fb(&self) -> GLuint {
        self.internal_read_fb
    }

    /// The framebuffer the application thinks is bound for drawing; 0 is the screen buffer.
    pub fn user_draw_fb(&self) -> GLuint {
        self.user_draw_fb
    }

    pub fn user_read_fb(&self) -> GLuint {
        self.user_read_fb
    }

    fn surface(&self, handle: &SurfaceHandle) -> &SharedSurface {
        match self.factory.get(handle.surface_id()) {
            Some(surface) => surface,
            None => panic!("{:?} vanished from its factory", handle),
        }
    }

    fn surface_mut(&mut self, handle: &SurfaceHandle) -> &mut SharedSurface {
        match self.factory.get_mut(handle.surface_id()) {
            Some(surface) => surface,
            None => panic!("{:?} vanished from its factory", handle),
        }
    }

    fn back_surface(&self) -> Option<&SharedSurface> {
        self.back.as_ref().map(|back| self.surface(back))
    }

    fn default_draw_fb(&self) -> GLuint {
        match self.draw {
            Some(ref draw) => draw.framebuffer(),
            None => self.default_read_fb(),
        }
    }

    fn default_read_fb(&self) -> GLuint {
        self.back_surface().map_or(0, |back| back.framebuffer())
    }

    /// Binds `user_framebuffer`, or the screen buffer when it is 0, to `target`.
    pub fn bind(&mut self, ctx: &GlContext, target: BindTarget, user_framebuffer: GLuint) -> bool {
        if self.lost {
            return false;
        }
        assert_eq!(ctx.id(), self.owner, "ScreenBuffer bound with a foreign GL context");
        let split = ctx.features().framebuffer_blit;
        assert!(split || target == BindTarget::Both,
                "{:?} bindings need separate draw and read framebuffer targets",
                target);

        let gl = ctx.gl();
        let (draw_fb, read_fb) = if user_framebuffer != 0 {
            (user_framebuffer, user_framebuffer)
        } else {
            (self.default_draw_fb(), self.default_read_fb())
        };

        match target {
            BindTarget::Draw => {
                gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, draw_fb);
                self.user_draw_fb = user_framebuffer;
                self.internal_draw_fb = draw_fb;
            }
            BindTarget::Read => {
                gl.bind_framebuffer(gl::READ_FRAMEBUFFER, read_fb);
                self.user_read_fb = user_framebuffer;
                self.internal_read_fb = read_fb;
            }
            BindTarget::Both => {
                if split && draw_fb != read_fb {
                    gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, draw_fb);
                    gl.bind_framebuffer(gl::READ_FRAMEBUFFER, read_fb);
                } else {
                    gl.bind_framebuffer(gl::FRAMEBUFFER, draw_fb);
                }
                self.user_draw_fb = user_framebuffer;
                self.user_read_fb = user_framebuffer;
                self.internal_draw_fb = draw_fb;
                self.internal_read_fb = read_fb;
            }
        }
        debug_assert!(self.validate_bindings(ctx));
        true
    }

    /// Whether the driver's bindings are the ones we predicted.
    pub fn validate_bindings(&self, ctx: &GlContext) -> bool {
        let gl = ctx.gl();
        if ctx.features().framebuffer_blit {
            gl.get_integer(gl::DRAW_FRAMEBUFFER_BINDING) as GLuint == self.internal_draw_fb &&
                gl.get_integer(gl::READ_FRAMEBUFFER_BINDING) as GLuint == self.internal_read_fb
        } else {
            gl.get_integer(gl::FRAMEBUFFER_BINDING) as GLuint == self.internal_draw_fb
        }
    }

    fn rebind(&mut self, ctx: &GlContext) {
        let (user_draw_fb, user_read_fb) = (self.user_draw_fb, self.user_read_fb);
        if ctx.features().framebuffer_blit {
            self.bind(ctx, BindTarget::Draw, user_draw_fb);
            self.bind(ctx, BindTarget::Read, user_read_fb);
        } else {
            self.bind(ctx, BindTarget::Both, user_draw_fb);
        }
    }

    /// Call after every draw call.
    pub fn after_draw_call(&mut self) {
        if self.user_draw_fb == 0 && self.draw.is_some() {
            self.needs_blit = true;
        }
    }

    /// Call before every read of the bound read framebuffer.
    pub fn before_read_call(&mut self, ctx: &GlContext) -> bool {
        if self.user_read_fb != 0 {
            return true;
        }
        self.resolve(ctx).is_ok()
    }

    /// Resolves pending multisampled drawing into the back surface. The application's scissor
    /// box does not apply.
    pub fn resolve(&mut self, ctx: &GlContext) -> Result<(), SurfaceError> {
        if !self.needs_blit {
            return Ok(());
        }
        let draw = match self.draw {
            Some(ref draw) => draw,
            None => {
                self.needs_blit = false;
                return Ok(());
            }
        };
        let back = match self.back_surface() {
            Some(back) => back,
            None => return Ok(()),
        };
        ctx.check_owner(self.owner)?;
        ctx.blit_helper().resolve(ctx, draw, back.platform())?;
        self.needs_blit = false;
        Ok(())
    }

    /// Gets a new back surface and, when antialiasing and the size changed, a new draw buffer.
    fn prepare_back(&mut self, ctx: &GlContext, size: Size2D<i32>)
                    -> Result<(SurfaceHandle, Option<DrawBuffer>), SurfaceError> {
        let handle = self.factory.new_client(ctx, size)?;
        let needs_draw = self.caps.antialias &&
            self.draw.as_ref().map_or(true, |draw| draw.size() != size);
        if !needs_draw {
            return Ok((handle, None));
        }
        let draw = DrawBuffer::new(ctx,
                                   size,
                                   self.samples,
                                   self.caps.alpha,
                                   self.caps.depth,
                                   self.caps.stencil)?;
        Ok((handle, Some(draw)))
    }

    /// Releases the current back surface, acquires `handle` and rebinds. Returns the old back.
    fn install_back(&mut self,
                    ctx: &GlContext,
                    handle: SurfaceHandle,
                    new_draw: Option<DrawBuffer>)
                    -> Result<Option<SurfaceHandle>, SurfaceError> {
        let old_back = self.back.take();
        if let Some(ref old_back) = old_back {
            let surface = self.surface_mut(old_back);
            if surface.is_write_acquired() {
                if let Err(error) = surface.producer_release(ctx) {
                    warn!("ScreenBuffer: releasing {:?} failed: {}", old_back, error);
                }
            }
        }

        if let Some(draw) = new_draw {
            if let Some(mut old_draw) = self.draw.replace(draw) {
                old_draw.destroy(ctx.gl());
            }
        }

        let acquired = self.surface_mut(&handle).producer_acquire(ctx);
        self.back = Some(handle);
        acquired?;
        self.rebind(ctx);
        Ok(old_back)
    }

    fn attach(&mut self, ctx: &GlContext, size: Size2D<i32>) -> Result<(), SurfaceError> {
        let (handle, new_draw) = self.prepare_back(ctx, size)?;
        self.install_back(ctx, handle, new_draw)?;
        self.needs_blit = false;
        Ok(())
    }

    fn allocate_with_halving(&mut self, ctx: &GlContext, requested: Size2D<i32>)
                             -> Result<Size2D<i32>, SurfaceError> {
        let max = ctx.limits().max_surface_dimension();
        let mut last_error = SurfaceError::TooLarge {
            width: requested.width,
            height: requested.height,
            max,
        };
        for candidate in geometry::halving_sequence(requested) {
            if !geometry::fits_within(candidate, max) {
                continue;
            }
            match self.attach(ctx, candidate) {
                Ok(()) => {
                    if candidate != requested {
                        warn!("ScreenBuffer: {}x{} unavailable, using {}x{}",
                              requested.width,
                              requested.height,
                              candidate.width,
                              candidate.height);
                    }
                    return Ok(candidate);
                }
                Err(error) if error.is_allocation_failure() => {
                    debug!("ScreenBuffer: {}x{} failed: {}", candidate.width, candidate.height, error);
                    last_error = error;
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error)
    }

    fn lose_context(&mut self, error: &SurfaceError) {
        if self.lost {
            return;
        }
        error!("ScreenBuffer: giving up on the context: {}", error);
        self.lost = true;
        self.observer.notify_context_lost();
    }

    /// Resizes the drawing buffer. The same size is a no-op. Sizes that cannot be allocated
    /// are halved; if nothing fits the context is lost.
    pub fn resize(&mut self, ctx: &GlContext, size: Size2D<i32>) -> bool {
        if self.lost {
            return false;
        }
        let size = geometry::clamp_to_min(size);
        if self.back.is_some() && self.size() == size {
            return true;
        }
        match self.allocate_with_halving(ctx, size) {
            Ok(_) => true,
            Err(error) => {
                self.lose_context(&error);
                false
            }
        }
    }

    /// Resolves, puts a new back surface of `size` in place and returns the old back as the
    /// new front.
    pub fn swap(&mut self, ctx: &GlContext, size: Size2D<i32>)
                -> Result<Option<SurfaceHandle>, SurfaceError> {
        if self.lost {
            return Err(SurfaceError::ContextLost);
        }
        self.resolve(ctx)?;
        let (handle, new_draw) = self.prepare_back(ctx, size)?;
        let front = self.install_back(ctx, handle, new_draw)?;

        let preserve_from = match (&front, &self.back) {
            (Some(front), Some(back)) if self.caps.preserve && self.draw.is_none() &&
                                         front.size() == size => {
                Some((back.surface_id(), front.surface_id()))
            }
            _ => None,
        };
        if let Some((back_id, front_id)) = preserve_from {
            self.factory.copy_between(ctx, back_id, front_id)?;
        }

        self.front = front.clone();
        self.needs_blit = self.draw.is_some();
        Ok(front)
    }

    /// Swaps at the current size and returns the frame for the consumer.
    pub fn publish_frame(&mut self, ctx: &GlContext) -> Option<SurfaceHandle> {
        if self.lost {
            return None;
        }
        let size = self.size();
        match self.swap(ctx, size) {
            Ok(front) => front,
            Err(error) => {
                self.lose_context(&error);
                None
            }
        }
    }

    /// Reads from the resolved back surface.
    #[allow(clippy::too_many_arguments)]
    pub fn read_pixels(&mut self,
                       ctx: &GlContext,
                       x: GLint,
                       y: GLint,
                       width: i32,
                       height: i32,
                       format: GLenum,
                       ty: GLenum,
                       destination: &mut [u8])
                       -> bool {
        if self.lost || self.resolve(ctx).is_err() {
            return false;
        }
        match self.back_surface() {
            Some(back) => {
                back.read_pixels(ctx, x, y, width, height, format, ty, destination).is_ok()
            }
            None => false,
        }
    }

    /// `glCopyTexImage2D` from the resolved back surface.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_tex_image(&mut self,
                          ctx: &GlContext,
                          target: GLenum,
                          level: GLint,
                          internal_format: GLenum,
                          x: GLint,
                          y: GLint,
                          width: i32,
                          height: i32)
                          -> bool {
        if self.lost || self.resolve(ctx).is_err() {
            return false;
        }
        match self.back_surface() {
            Some(back) => {
                back.copy_tex_image_2d(ctx, target, level, internal_format, x, y, width, height)
                    .is_ok()
            }
            None => false,
        }
    }

    /// RGBA rows, bottom row first, of the resolved back surface.
    pub fn snapshot(&mut self, ctx: &GlContext) -> Option<Vec<u8>> {
        let size = self.size();
        let mut pixels = vec![0; geometry::rgba_byte_len(size)];
        if self.read_pixels(ctx, 0, 0, size.width, size.height, gl::RGBA, gl::UNSIGNED_BYTE,
                            &mut pixels) {
            Some(pixels)
        } else {
            None
        }
    }

    /// Switches the factory to a better mechanism. Surfaces already issued keep theirs.
    pub fn morph(&mut self, ctx: &GlContext, backend: BackendInfo, force: bool) -> bool {
        self.factory.morph(ctx, backend, force)
    }

    pub fn destroy(&mut self, ctx: &GlContext) {
        if let Some(back) = self.back.take() {
            let surface = self.surface_mut(&back);
            if surface.is_write_acquired() {
                if let Err(error) = surface.producer_release(ctx) {
                    debug!("ScreenBuffer: final release of {:?}: {}", back, error);
                }
            }
        }
        self.front = None;
        if let Some(mut draw) = self.draw.take() {
            if ctx.is_alive() {
                draw.destroy(ctx.gl());
            } else {
                draw.forget();
            }
        }
        self.factory.destroy(ctx);
    }
}

impl Drop for ScreenBuffer {
    fn drop(&mut self) {
        if let Some(mut draw) = self.draw.take() {
            warn!("ScreenBuffer dropped without destroy()");
            draw.forget();
        }
    }
}
