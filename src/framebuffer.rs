// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Framebuffer objects and their attachments.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::gl::{self, GLenum, GLuint, GlDriver};
use crate::texturegl::{Texture, TextureTarget};

use euclid::default::Size2D;
use log::debug;
use std::thread;

/// Saves the draw and read framebuffer bindings and restores them on drop.
pub struct ScopedBindFramebuffer<'a> {
    gl: &'a dyn GlDriver,
    split: bool,
    old_draw: GLuint,
    old_read: GLuint,
}

impl<'a> ScopedBindFramebuffer<'a> {
    pub fn new(gl: &'a dyn GlDriver) -> ScopedBindFramebuffer<'a> {
        let split = gl.features().framebuffer_blit;
        let (old_draw, old_read) = if split {
            (gl.get_integer(gl::DRAW_FRAMEBUFFER_BINDING) as GLuint,
             gl.get_integer(gl::READ_FRAMEBUFFER_BINDING) as GLuint)
        } else {
            let fb = gl.get_integer(gl::FRAMEBUFFER_BINDING) as GLuint;
            (fb, fb)
        };
        ScopedBindFramebuffer { gl, split, old_draw, old_read }
    }

    pub fn bind(gl: &'a dyn GlDriver, framebuffer: GLuint) -> ScopedBindFramebuffer<'a> {
        let scoped = ScopedBindFramebuffer::new(gl);
        gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer);
        scoped
    }
}

impl<'a> Drop for ScopedBindFramebuffer<'a> {
    fn drop(&mut self) {
        if self.split && self.old_draw != self.old_read {
            self.gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, self.old_draw);
            self.gl.bind_framebuffer(gl::READ_FRAMEBUFFER, self.old_read);
        } else {
            self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.old_draw);
        }
    }
}

/// Forces a capability on or off for the guard's lifetime.
pub struct ScopedGlState<'a> {
    gl: &'a dyn GlDriver,
    cap: GLenum,
    was_enabled: bool,
}

impl<'a> ScopedGlState<'a> {
    pub fn new(gl: &'a dyn GlDriver, cap: GLenum, enabled: bool) -> ScopedGlState<'a> {
        let was_enabled = gl.is_enabled(cap);
        if was_enabled != enabled {
            if enabled {
                gl.enable(cap)
            } else {
                gl.disable(cap)
            }
        }
        ScopedGlState { gl, cap, was_enabled }
    }
}

impl<'a> Drop for ScopedGlState<'a> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.gl.enable(self.cap)
        } else {
            self.gl.disable(self.cap)
        }
    }
}

/// A temporary framebuffer wrapping a texture, deleted on drop.
pub struct ScopedFramebufferForTexture<'a> {
    gl: &'a dyn GlDriver,
    framebuffer: GLuint,
}

impl<'a> ScopedFramebufferForTexture<'a> {
    pub fn new(gl: &'a dyn GlDriver, texture: &Texture) -> ScopedFramebufferForTexture<'a> {
        let framebuffer = gl.gen_framebuffer();
        {
            let _bind = ScopedBindFramebuffer::bind(gl, framebuffer);
            gl.framebuffer_texture_2d(gl::FRAMEBUFFER,
                                      gl::COLOR_ATTACHMENT0,
                                      texture.target.as_gl_target(),
                                      texture.native_texture());
        }
        ScopedFramebufferForTexture { gl, framebuffer }
    }

    pub fn framebuffer(&self) -> GLuint {
        self.framebuffer
    }
}

impl<'a> Drop for ScopedFramebufferForTexture<'a> {
    fn drop(&mut self) {
        self.gl.delete_framebuffer(self.framebuffer);
    }
}

/// Whether a surface renders into a texture or a renderbuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentType {
    Texture(TextureTarget),
    Renderbuffer,
}

#[derive(Debug)]
pub enum ColorAttachment {
    Texture(Texture),
    Renderbuffer(GLuint),
}

impl ColorAttachment {
    pub fn attachment_type(&self) -> AttachmentType {
        match *self {
            ColorAttachment::Texture(ref texture) => AttachmentType::Texture(texture.target),
            ColorAttachment::Renderbuffer(_) => AttachmentType::Renderbuffer,
        }
    }

    pub fn texture(&self) -> Option<&Texture> {
        match *self {
            ColorAttachment::Texture(ref texture) => Some(texture),
            ColorAttachment::Renderbuffer(_) => None,
        }
    }

    /// Allocates a single-sampled color renderbuffer.
    pub fn renderbuffer(gl: &dyn GlDriver, size: Size2D<i32>, has_alpha: bool)
                        -> Result<ColorAttachment, SurfaceError> {
        let format = if has_alpha { gl::RGBA8 } else { gl::RGB8 };
        allocate_renderbuffer(gl, 0, format, size).map(ColorAttachment::Renderbuffer)
    }

    fn attach(&self, gl: &dyn GlDriver) {
        match *self {
            ColorAttachment::Texture(ref texture) => {
                gl.framebuffer_texture_2d(gl::FRAMEBUFFER,
                                          gl::COLOR_ATTACHMENT0,
                                          texture.target.as_gl_target(),
                                          texture.native_texture())
            }
            ColorAttachment::Renderbuffer(renderbuffer) => {
                gl.framebuffer_renderbuffer(gl::FRAMEBUFFER, gl::COLOR_ATTACHMENT0, renderbuffer)
            }
        }
    }

    fn destroy(&self, gl: &dyn GlDriver) {
        match *self {
            ColorAttachment::Texture(ref texture) => texture.destroy(gl),
            ColorAttachment::Renderbuffer(renderbuffer) => gl.delete_renderbuffer(renderbuffer),
        }
    }
}

fn allocate_renderbuffer(gl: &dyn GlDriver,
                         samples: i32,
                         format: GLenum,
                         size: Size2D<i32>)
                         -> Result<GLuint, SurfaceError> {
    let renderbuffer = gl.gen_renderbuffer();
    gl.bind_renderbuffer(renderbuffer);
    gl.renderbuffer_storage(samples, format, size.width, size.height);
    gl.bind_renderbuffer(0);
    match gl.get_error() {
        gl::NO_ERROR => Ok(renderbuffer),
        error => {
            gl.delete_renderbuffer(renderbuffer);
            if error == gl::OUT_OF_MEMORY {
                Err(SurfaceError::OutOfMemory)
            } else {
                Err(SurfaceError::AllocationFailed { width: size.width, height: size.height })
            }
        }
    }
}

/// Depth and stencil renderbuffers shared by every surface a factory hands out at one size.
#[derive(Debug)]
pub struct DepthStencilBuffers {
    pub size: Size2D<i32>,
    pub samples: i32,
    depth: Option<GLuint>,
    stencil: Option<GLuint>,
    packed: bool,
}

impl DepthStencilBuffers {
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               samples: i32,
               depth: bool,
               stencil: bool)
               -> Result<DepthStencilBuffers, SurfaceError> {
        let gl = ctx.gl();
        let mut buffers = DepthStencilBuffers {
            size,
            samples,
            depth: None,
            stencil: None,
            packed: false,
        };
        if depth && stencil && ctx.features().packed_depth_stencil {
            let renderbuffer = allocate_renderbuffer(gl, samples, gl::DEPTH24_STENCIL8, size)?;
            buffers.depth = Some(renderbuffer);
            buffers.stencil = Some(renderbuffer);
            buffers.packed = true;
            return Ok(buffers);
        }

        if depth {
            match allocate_renderbuffer(gl, samples, gl::DEPTH_COMPONENT16, size) {
                Ok(renderbuffer) => buffers.depth = Some(renderbuffer),
                Err(error) => {
                    buffers.destroy(gl);
                    return Err(error);
                }
            }
        }
        if stencil {
            match allocate_renderbuffer(gl, samples, gl::STENCIL_INDEX8, size) {
                Ok(renderbuffer) => buffers.stencil = Some(renderbuffer),
                Err(error) => {
                    buffers.destroy(gl);
                    return Err(error);
                }
            }
        }
        Ok(buffers)
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_none() && self.stencil.is_none()
    }

    fn attach(&self, gl: &dyn GlDriver) {
        gl.framebuffer_renderbuffer(gl::FRAMEBUFFER, gl::DEPTH_ATTACHMENT, self.depth.unwrap_or(0));
        gl.framebuffer_renderbuffer(gl::FRAMEBUFFER,
                                    gl::STENCIL_ATTACHMENT,
                                    self.stencil.unwrap_or(0));
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        if let Some(depth) = self.depth.take() {
            gl.delete_renderbuffer(depth);
        }
        if let Some(stencil) = self.stencil.take() {
            if !self.packed {
                gl.delete_renderbuffer(stencil);
            }
        }
    }
}

fn detach_depth_stencil(gl: &dyn GlDriver) {
    gl.framebuffer_renderbuffer(gl::FRAMEBUFFER, gl::DEPTH_ATTACHMENT, 0);
    gl.framebuffer_renderbuffer(gl::FRAMEBUFFER, gl::STENCIL_ATTACHMENT, 0);
}

fn check_complete(gl: &dyn GlDriver) -> Result<(), SurfaceError> {
    match gl.check_framebuffer_status(gl::FRAMEBUFFER) {
        gl::FRAMEBUFFER_COMPLETE => Ok(()),
        status => Err(SurfaceError::IncompleteFramebuffer(status)),
    }
}

/// A drawable: a framebuffer with a color attachment and, optionally, the factory's shared
/// depth/stencil attachments. Its size never changes.
#[derive(Debug)]
pub struct PlatformSurface {
    size: Size2D<i32>,
    framebuffer: GLuint,
    color: ColorAttachment,
    depth_stencil_size: Option<Size2D<i32>>,
    destroyed: bool,
}

impl PlatformSurface {
    /// Builds a framebuffer around `color`. Takes ownership of `color` even on failure.
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               color: ColorAttachment,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<PlatformSurface, SurfaceError> {
        let gl = ctx.gl();
        let framebuffer = gl.gen_framebuffer();
        let mut surface = PlatformSurface {
            size,
            framebuffer,
            color,
            depth_stencil_size: None,
            destroyed: false,
        };

        let status = {
            let _bind = ScopedBindFramebuffer::bind(gl, framebuffer);
            surface.color.attach(gl);
            if let Some(depth_stencil) = depth_stencil {
                debug_assert_eq!(depth_stencil.size, size);
                depth_stencil.attach(gl);
                surface.depth_stencil_size = Some(depth_stencil.size);
            }
            check_complete(gl)
        };

        if let Err(error) = status {
            debug!("PlatformSurface::new: {}x{} failed: {}", size.width, size.height, error);
            surface.destroy(gl);
            return Err(error);
        }
        Ok(surface)
    }

    pub fn size(&self) -> Size2D<i32> {
        self.size
    }

    pub fn framebuffer(&self) -> GLuint {
        self.framebuffer
    }

    pub fn color(&self) -> &ColorAttachment {
        &self.color
    }

    pub fn attachment_type(&self) -> AttachmentType {
        self.color.attachment_type()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.depth_stencil_size.is_some()
    }

    /// Points this surface at `depth_stencil`, or detaches when it does not match our size.
    pub fn attach_depth_stencil(&mut self,
                                gl: &dyn GlDriver,
                                depth_stencil: Option<&DepthStencilBuffers>) {
        let _bind = ScopedBindFramebuffer::bind(gl, self.framebuffer);
        match depth_stencil {
            Some(buffers) if buffers.size == self.size && !buffers.is_empty() => {
                buffers.attach(gl);
                self.depth_stencil_size = Some(buffers.size);
            }
            _ => {
                if self.depth_stencil_size.take().is_some() {
                    detach_depth_stencil(gl);
                }
            }
        }
    }

    /// Binds the framebuffer to `target`.
    pub fn bind(&self, gl: &dyn GlDriver, target: GLenum) {
        debug_assert!(!self.destroyed);
        gl.bind_framebuffer(target, self.framebuffer);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        if self.destroyed {
            return;
        }
        gl.delete_framebuffer(self.framebuffer);
        self.color.destroy(gl);
        self.destroyed = true;
    }

    /// Records that the GL objects died with their context.
    pub fn forget(&mut self) {
        self.destroyed = true;
    }
}

impl Drop for PlatformSurface {
    fn drop(&mut self) {
        if !self.destroyed && !thread::panicking() {
            panic!("You should have disposed of the surface properly with destroy()! This \
                    framebuffer will leak!");
        }
    }
}

/// The multisampled framebuffer that antialiased contexts actually draw into.
#[derive(Debug)]
pub struct DrawBuffer {
    size: Size2D<i32>,
    samples: i32,
    framebuffer: GLuint,
    color: GLuint,
    depth_stencil: Option<DepthStencilBuffers>,
    destroyed: bool,
}

impl DrawBuffer {
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               samples: i32,
               has_alpha: bool,
               depth: bool,
               stencil: bool)
               -> Result<DrawBuffer, SurfaceError> {
        let gl = ctx.gl();
        let format = if has_alpha { gl::RGBA8 } else { gl::RGB8 };
        let color = allocate_renderbuffer(gl, samples, format, size)?;
        let depth_stencil = if depth || stencil {
            match DepthStencilBuffers::new(ctx, size, samples, depth, stencil) {
                Ok(buffers) => Some(buffers),
                Err(error) => {
                    gl.delete_renderbuffer(color);
                    return Err(error);
                }
            }
        } else {
            None
        };

        let framebuffer = gl.gen_framebuffer();
        let mut draw = DrawBuffer {
            size,
            samples,
            framebuffer,
            color,
            depth_stencil,
            destroyed: false,
        };
        let status = {
            let _bind = ScopedBindFramebuffer::bind(gl, framebuffer);
            gl.framebuffer_renderbuffer(gl::FRAMEBUFFER, gl::COLOR_ATTACHMENT0, color);
            if let Some(ref buffers) = draw.depth_stencil {
                buffers.attach(gl);
            }
            check_complete(gl)
        };
        if let Err(error) = status {
            draw.destroy(gl);
            return Err(error);
        }
        debug!("DrawBuffer::new: {}x{} with {} samples", size.width, size.height, samples);
        Ok(draw)
    }

    pub fn size(&self) -> Size2D<i32> {
        self.size
    }

    pub fn samples(&self) -> i32 {
        self.samples
    }

    pub fn framebuffer(&self) -> GLuint {
        self.framebuffer
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        if self.destroyed {
            return;
        }
        gl.delete_framebuffer(self.framebuffer);
        gl.delete_renderbuffer(self.color);
        if let Some(ref mut buffers) = self.depth_stencil {
            buffers.destroy(gl);
        }
        self.destroyed = true;
    }

    pub fn forget(&mut self) {
        self.destroyed = true;
    }
}

impl Drop for DrawBuffer {
    fn drop(&mut self) {
        if !self.destroyed && !thread::panicking() {
            panic!("DrawBuffer dropped without destroy()!");
        }
    }
}
