// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The producer side of a surface: one drawable plus the ownership state machine every
//! mechanism shares.
//!
//! A surface is `Idle`, `WriteAcquired` by the producer while it renders, or `ReadAcquired` by
//! the producer while it copies out of it. Leaving `Idle` from any other state is a bug in the
//! caller and panics.

use crate::config::SurfaceConfig;
use crate::context::{ContextId, GlContext};
use crate::error::SurfaceError;
use crate::framebuffer::{AttachmentType, DepthStencilBuffers, PlatformSurface};
use crate::framebuffer::ScopedBindFramebuffer;
use crate::geometry;
use crate::gl::{GLenum, GLint, GLuint};
use crate::platform::surface::{BackendInfo, Mechanism, SurfaceKind, TransferDescriptor};
use crate::sync::ConsumerLink;

use euclid::default::Size2D;
use log::{debug, error, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-unique surface identity. Never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> SurfaceId {
        static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SurfaceId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "SurfaceId({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessState {
    Idle,
    WriteAcquired,
    ReadAcquired,
}

pub struct SharedSurface {
    id: SurfaceId,
    owner: ContextId,
    size: Size2D<i32>,
    has_alpha: bool,
    can_recycle: bool,
    state: AccessState,
    locked: bool,
    acquire_timeout: Duration,
    kind: SurfaceKind,
}

impl fmt::Debug for SharedSurface {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_struct("SharedSurface")
                 .field("id", &self.id)
                 .field("mechanism", &self.kind.mechanism())
                 .field("size", &self.size)
                 .field("state", &self.state)
                 .field("locked", &self.locked)
                 .finish()
    }
}

impl SharedSurface {
    /// Allocates a surface of `mechanism` owned by `ctx`.
    pub fn new(ctx: &GlContext,
               mechanism: Mechanism,
               backend: &BackendInfo,
               size: Size2D<i32>,
               has_alpha: bool,
               config: &SurfaceConfig,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<SharedSurface, SurfaceError> {
        if !ctx.is_alive() {
            return Err(SurfaceError::ContextLost);
        }
        let max = ctx.limits().max_surface_dimension();
        if !geometry::fits_within(size, max) {
            return Err(SurfaceError::TooLarge { width: size.width, height: size.height, max });
        }

        let kind = SurfaceKind::new(ctx, mechanism, backend, size, has_alpha, config,
                                    depth_stencil)?;
        let surface = SharedSurface {
            id: SurfaceId::next(),
            owner: ctx.id(),
            size,
            has_alpha,
            can_recycle: true,
            state: AccessState::Idle,
            locked: false,
            acquire_timeout: config.acquire_timeout(),
            kind,
        };
        debug!("SharedSurface::new: {:?} {:?} {}x{}",
               surface.id, mechanism, size.width, size.height);
        Ok(surface)
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn size(&self) -> Size2D<i32> {
        self.size
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn can_recycle(&self) -> bool {
        self.can_recycle
    }

    pub fn set_can_recycle(&mut self, can_recycle: bool) {
        self.can_recycle = can_recycle;
    }

    pub fn mechanism(&self) -> Mechanism {
        self.kind.mechanism()
    }

    pub fn state(&self) -> AccessState {
        self.state
    }

    pub fn is_write_acquired(&self) -> bool {
        self.state == AccessState::WriteAcquired
    }

    pub fn is_read_acquired(&self) -> bool {
        self.state == AccessState::ReadAcquired
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn attachment_type(&self) -> AttachmentType {
        self.kind.platform().attachment_type()
    }

    pub fn framebuffer(&self) -> GLuint {
        self.kind.platform().framebuffer()
    }

    pub fn platform(&self) -> &PlatformSurface {
        self.kind.platform()
    }

    pub fn has_depth_stencil(&self) -> bool {
        self.kind.platform().has_depth_stencil()
    }

    pub fn producer_acquire(&mut self, ctx: &GlContext) -> Result<(), SurfaceError> {
        assert_eq!(self.state, AccessState::Idle,
                   "producer_acquire on {:?} while {:?}", self.id, self.state);
        ctx.check_owner(self.owner)?;
        self.kind.producer_acquire(ctx, self.acquire_timeout);
        self.state = AccessState::WriteAcquired;
        Ok(())
    }

    /// Hands the frame off. The content is stable once the release fence, if any, signals.
    pub fn producer_release(&mut self, ctx: &GlContext) -> Result<(), SurfaceError> {
        assert_eq!(self.state, AccessState::WriteAcquired,
                   "producer_release on {:?} while {:?}", self.id, self.state);
        if self.locked {
            self.unlock_prod(ctx);
        }
        self.state = AccessState::Idle;
        ctx.check_owner(self.owner)?;
        self.kind.producer_release(ctx);
        Ok(())
    }

    pub fn producer_read_acquire(&mut self, ctx: &GlContext) -> Result<(), SurfaceError> {
        assert_eq!(self.state, AccessState::Idle,
                   "producer_read_acquire on {:?} while {:?}", self.id, self.state);
        ctx.check_owner(self.owner)?;
        self.kind.producer_read_acquire(ctx, self.acquire_timeout);
        self.state = AccessState::ReadAcquired;
        Ok(())
    }

    pub fn producer_read_release(&mut self, ctx: &GlContext) -> Result<(), SurfaceError> {
        assert_eq!(self.state, AccessState::ReadAcquired,
                   "producer_read_release on {:?} while {:?}", self.id, self.state);
        self.state = AccessState::Idle;
        ctx.check_owner(self.owner)?;
        self.kind.producer_read_release(ctx);
        Ok(())
    }

    /// Makes this surface the one the context treats as current.
    pub fn lock_prod(&mut self, ctx: &GlContext) {
        assert_eq!(self.state, AccessState::WriteAcquired,
                   "lock_prod on {:?} while {:?}", self.id, self.state);
        assert!(!self.locked, "{:?} is already locked", self.id);
        assert_eq!(ctx.id(), self.owner, "lock_prod with a foreign GL context");
        ctx.set_locked_surface(Some(self.id));
        self.locked = true;
    }

    pub fn unlock_prod(&mut self, ctx: &GlContext) {
        if !self.locked {
            return;
        }
        if ctx.locked_surface() == Some(self.id) {
            ctx.set_locked_surface(None);
        }
        self.locked = false;
    }

    /// Copies all of `source` into this surface. Both must be the same size, `source`
    /// read-acquired and this surface write-acquired.
    pub fn copy_from(&mut self, ctx: &GlContext, source: &SharedSurface)
                     -> Result<(), SurfaceError> {
        assert_eq!(self.size, source.size, "copy_from between differently sized surfaces");
        assert_eq!(source.state, AccessState::ReadAcquired,
                   "copy_from a source that is {:?}", source.state);
        assert_eq!(self.state, AccessState::WriteAcquired,
                   "copy_from into a destination that is {:?}", self.state);
        ctx.check_owner(self.owner)?;
        ctx.check_owner(source.owner)?;

        if self.mechanism() == source.mechanism() {
            match self.kind.fast_copy_from(ctx, &source.kind) {
                Ok(()) => return Ok(()),
                Err(SurfaceError::Unsupported { .. }) => {}
                Err(error) => {
                    warn!("fast copy {:?} -> {:?} failed ({}); using the generic path",
                          source.id, self.id, error);
                }
            }
        }

        let result = ctx.blit_helper().copy_surface(ctx, source.kind.platform(),
                                                    self.kind.platform());
        if let Err(error) = result {
            error!("generic copy {:?} -> {:?} failed: {}", source.id, self.id, error);
            panic!("unrecoverable GPU state after a failed surface copy: {}", error);
        }
        Ok(())
    }

    pub fn to_transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        self.kind.transfer_descriptor()
    }

    /// Blocks until no consumer still owns a surface coming back from the recycle pool.
    pub fn wait_for_buffer_ownership(&self) {
        self.kind.wait_for_buffer_ownership(self.acquire_timeout)
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        self.kind.consumer_link()
    }

    pub fn attach_depth_stencil(&mut self,
                                ctx: &GlContext,
                                depth_stencil: Option<&DepthStencilBuffers>) {
        self.kind.platform_mut().attach_depth_stencil(ctx.gl(), depth_stencil)
    }

    pub fn bind(&self, ctx: &GlContext, target: GLenum) {
        self.kind.platform().bind(ctx.gl(), target)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn read_pixels(&self,
                       ctx: &GlContext,
                       x: GLint,
                       y: GLint,
                       width: i32,
                       height: i32,
                       format: GLenum,
                       ty: GLenum,
                       destination: &mut [u8])
                       -> Result<(), SurfaceError> {
        ctx.check_owner(self.owner)?;
        let gl = ctx.gl();
        {
            let _bind = ScopedBindFramebuffer::bind(gl, self.framebuffer());
            gl.read_pixels(x, y, width, height, format, ty, destination);
        }
        match ctx.take_error() {
            None => Ok(()),
            Some(error) => Err(SurfaceError::Gl(error)),
        }
    }

    /// `glCopyTexImage2D` from this surface into the texture bound to `target`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_tex_image_2d(&self,
                             ctx: &GlContext,
                             target: GLenum,
                             level: GLint,
                             internal_format: GLenum,
                             x: GLint,
                             y: GLint,
                             width: i32,
                             height: i32)
                             -> Result<(), SurfaceError> {
        ctx.check_owner(self.owner)?;
        let gl = ctx.gl();
        {
            let _bind = ScopedBindFramebuffer::bind(gl, self.framebuffer());
            gl.copy_tex_image_2d(target, level, internal_format, x, y, width, height);
        }
        match ctx.take_error() {
            None => Ok(()),
            Some(error) => Err(SurfaceError::Gl(error)),
        }
    }

    /// Frees the GL objects, or just forgets them when they died with their context.
    pub fn destroy(&mut self, ctx: &GlContext) {
        self.unlock_prod(ctx);
        if ctx.id() == self.owner && ctx.is_alive() {
            self.kind.destroy(ctx.gl());
        } else {
            self.kind.forget();
        }
    }

    pub fn forget(&mut self) {
        self.kind.forget()
    }
}
