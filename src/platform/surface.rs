// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of shareable surfaces. This delegates to the mechanism-specific
//! implementation.

use crate::config::SurfaceConfig;
use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{DepthStencilBuffers, PlatformSurface};
use crate::gl::{GLuint, GlDriver};
use crate::sync::ConsumerLink;
use crate::texturegl::TextureTarget;

use euclid::default::Size2D;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use crate::platform::basic::BasicSurface;
pub use crate::platform::texture_share::SharedTextureSurface;

#[cfg(all(target_os = "linux", feature = "pixmap"))]
pub use crate::platform::linux::surface::{NativeDisplay, PixmapSurface};

#[cfg(all(target_os = "macos", feature = "iosurface"))]
pub use crate::platform::macos::surface::IOSurfaceSurface;

/// How a surface's pixels reach the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    /// CPU readback into a staging buffer. Always available.
    Basic,
    /// A GL texture visible to every context in the producer's share group.
    SharedTexture,
    /// An X pixmap bound through `GLX_EXT_texture_from_pixmap`.
    Pixmap,
    /// A global `IOSurface`.
    IOSurface,
}

impl Mechanism {
    /// Whether this build contains the backend.
    pub fn is_available(self) -> bool {
        match self {
            Mechanism::Basic | Mechanism::SharedTexture => true,
            Mechanism::Pixmap => cfg!(all(target_os = "linux", feature = "pixmap")),
            Mechanism::IOSurface => cfg!(all(target_os = "macos", feature = "iosurface")),
        }
    }
}

/// What the factory knows about where its frames are going.
#[derive(Clone, Debug)]
pub enum BackendInfo {
    /// No compositor connection yet.
    Placeholder,
    /// The consumer is a GL context in this process.
    SameProcess { share_group: u64 },
    #[cfg(all(target_os = "linux", feature = "pixmap"))]
    Glx(NativeDisplay),
    #[cfg(all(target_os = "macos", feature = "iosurface"))]
    IOSurface,
}

impl BackendInfo {
    fn supports(&self, mechanism: Mechanism) -> bool {
        match (mechanism, self) {
            (Mechanism::Basic, _) | (Mechanism::SharedTexture, _) => true,
            #[cfg(all(target_os = "linux", feature = "pixmap"))]
            (Mechanism::Pixmap, &BackendInfo::Glx(_)) => true,
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            (Mechanism::IOSurface, &BackendInfo::IOSurface) => true,
            _ => false,
        }
    }

    fn natural_mechanism(&self, ctx: &GlContext) -> Mechanism {
        match *self {
            BackendInfo::Placeholder => Mechanism::Basic,
            BackendInfo::SameProcess { share_group } => {
                if share_group == ctx.share_group() {
                    Mechanism::SharedTexture
                } else {
                    debug!("consumer share group {} differs from producer's {}; reading back",
                           share_group,
                           ctx.share_group());
                    Mechanism::Basic
                }
            }
            #[cfg(all(target_os = "linux", feature = "pixmap"))]
            BackendInfo::Glx(_) => Mechanism::Pixmap,
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            BackendInfo::IOSurface => Mechanism::IOSurface,
        }
    }
}

/// Picks the mechanism a factory will allocate with.
pub fn select_mechanism(ctx: &GlContext, backend: &BackendInfo, config: &SurfaceConfig)
                        -> Mechanism {
    if let Some(forced) = config.force_mechanism {
        if forced.is_available() && backend.supports(forced) {
            return forced;
        }
        warn!("Ignoring forced mechanism {:?}: unavailable for {:?}", forced, backend);
    }
    backend.natural_mechanism(ctx)
}

/// Everything a consumer needs to import a surface without copying it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDescriptor {
    SharedTexture {
        share_group: u64,
        texture: GLuint,
        target: TextureTarget,
        size: Size2D<i32>,
    },
    Pixmap {
        pixmap: u64,
        size: Size2D<i32>,
    },
    IOSurface {
        id: u32,
        size: Size2D<i32>,
    },
}

impl TransferDescriptor {
    pub fn size(&self) -> Size2D<i32> {
        match *self {
            TransferDescriptor::SharedTexture { size, .. } |
            TransferDescriptor::Pixmap { size, .. } |
            TransferDescriptor::IOSurface { size, .. } => size,
        }
    }
}

pub enum SurfaceKind {
    Basic(BasicSurface),
    SharedTexture(SharedTextureSurface),
    #[cfg(all(target_os = "linux", feature = "pixmap"))]
    Pixmap(PixmapSurface),
    #[cfg(all(target_os = "macos", feature = "iosurface"))]
    IOSurface(IOSurfaceSurface),
}

macro_rules! surface_kind_method_with_mutability {
    ($self_:ident, $function_name:ident, $surface:ident, $pattern:pat, $($argument:ident),*) => {
        match *$self_ {
            SurfaceKind::Basic($pattern) =>
                $surface.$function_name($($argument),*),
            SurfaceKind::SharedTexture($pattern) =>
                $surface.$function_name($($argument),*),
            #[cfg(all(target_os = "linux", feature = "pixmap"))]
            SurfaceKind::Pixmap($pattern) =>
                $surface.$function_name($($argument),*),
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            SurfaceKind::IOSurface($pattern) =>
                $surface.$function_name($($argument),*),
        }
    };
}

macro_rules! surface_kind_method_mut {
    ($self_:ident $function_name:ident ($($argument:ident),*)) => {
        surface_kind_method_with_mutability!($self_,
                                             $function_name,
                                             surface,
                                             ref mut surface,
                                             $($argument),*)
    };
}

macro_rules! surface_kind_method {
    ($self_:ident $function_name:ident ($($argument:ident),*)) => {
        surface_kind_method_with_mutability!($self_,
                                             $function_name,
                                             surface,
                                             ref surface,
                                             $($argument),*)
    };
}

impl SurfaceKind {
    /// Allocates a surface of `mechanism`.
    #[allow(unused_variables)]
    pub fn new(ctx: &GlContext,
               mechanism: Mechanism,
               backend: &BackendInfo,
               size: Size2D<i32>,
               has_alpha: bool,
               config: &SurfaceConfig,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<SurfaceKind, SurfaceError> {
        match mechanism {
            Mechanism::Basic => {
                BasicSurface::new(ctx, size, has_alpha, config.prefer_texture_color, depth_stencil)
                    .map(SurfaceKind::Basic)
            }
            Mechanism::SharedTexture => {
                SharedTextureSurface::new(ctx, size, has_alpha, depth_stencil)
                    .map(SurfaceKind::SharedTexture)
            }
            #[cfg(all(target_os = "linux", feature = "pixmap"))]
            Mechanism::Pixmap => {
                match *backend {
                    BackendInfo::Glx(ref display) => {
                        PixmapSurface::new(ctx, display, size, has_alpha, depth_stencil)
                            .map(SurfaceKind::Pixmap)
                    }
                    _ => Err(SurfaceError::Unsupported { mechanism, operation: "create" }),
                }
            }
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            Mechanism::IOSurface => {
                IOSurfaceSurface::new(ctx, size, has_alpha, depth_stencil)
                    .map(SurfaceKind::IOSurface)
            }
            #[allow(unreachable_patterns)]
            _ => Err(SurfaceError::Unsupported { mechanism, operation: "create" }),
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        match *self {
            SurfaceKind::Basic(_) => Mechanism::Basic,
            SurfaceKind::SharedTexture(_) => Mechanism::SharedTexture,
            #[cfg(all(target_os = "linux", feature = "pixmap"))]
            SurfaceKind::Pixmap(_) => Mechanism::Pixmap,
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            SurfaceKind::IOSurface(_) => Mechanism::IOSurface,
        }
    }

    pub fn platform(&self) -> &PlatformSurface {
        surface_kind_method!(self platform ())
    }

    pub fn platform_mut(&mut self) -> &mut PlatformSurface {
        surface_kind_method_mut!(self platform_mut ())
    }

    pub fn producer_acquire(&mut self, ctx: &GlContext, timeout: Duration) {
        surface_kind_method_mut!(self producer_acquire (ctx, timeout))
    }

    pub fn producer_release(&mut self, ctx: &GlContext) {
        surface_kind_method_mut!(self producer_release (ctx))
    }

    pub fn producer_read_acquire(&mut self, ctx: &GlContext, timeout: Duration) {
        surface_kind_method_mut!(self producer_read_acquire (ctx, timeout))
    }

    pub fn producer_read_release(&mut self, ctx: &GlContext) {
        surface_kind_method_mut!(self producer_read_release (ctx))
    }

    /// Copies `source` into this surface without leaving the mechanism.
    pub fn fast_copy_from(&mut self, ctx: &GlContext, source: &SurfaceKind)
                          -> Result<(), SurfaceError> {
        match (self, source) {
            (&mut SurfaceKind::SharedTexture(ref mut destination),
             &SurfaceKind::SharedTexture(ref source)) => destination.copy_from_texture(ctx, source),
            #[cfg(all(target_os = "macos", feature = "iosurface"))]
            (&mut SurfaceKind::IOSurface(ref mut destination),
             &SurfaceKind::IOSurface(ref source)) => destination.copy_from_surface(ctx, source),
            (destination, _) => {
                Err(SurfaceError::Unsupported {
                    mechanism: destination.mechanism(),
                    operation: "fast copy",
                })
            }
        }
    }

    pub fn transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        surface_kind_method!(self transfer_descriptor ())
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        surface_kind_method!(self consumer_link ())
    }

    pub fn wait_for_buffer_ownership(&self, timeout: Duration) {
        surface_kind_method!(self wait_for_buffer_ownership (timeout))
    }

    /// Destroys the surface. After this, it is an error to use the surface.
    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        surface_kind_method_mut!(self destroy (gl))
    }

    /// Records that the surface's GL objects went away with their context.
    pub fn forget(&mut self) {
        surface_kind_method_mut!(self forget ())
    }
}
