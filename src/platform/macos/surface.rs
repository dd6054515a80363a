// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mac OS-specific implementation of shareable surfaces. This uses `IOSurface`, introduced
//! in Mac OS X 10.6 Snow Leopard.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{ColorAttachment, DepthStencilBuffers, PlatformSurface};
use crate::framebuffer::ScopedBindFramebuffer;
use crate::gl::GlDriver;
use crate::platform::surface::{Mechanism, TransferDescriptor};
use crate::sync::ConsumerLink;
use crate::texturegl::{Texture, TextureTarget};

use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use euclid::default::Size2D;
use io_surface::{self, IOSurface};
use std::time::Duration;

fn new_io_surface(size: Size2D<i32>) -> IOSurface {
    unsafe {
        let width_key: CFString = TCFType::wrap_under_get_rule(io_surface::kIOSurfaceWidth);
        let width_value: CFNumber = CFNumber::from(size.width);

        let height_key: CFString = TCFType::wrap_under_get_rule(io_surface::kIOSurfaceHeight);
        let height_value: CFNumber = CFNumber::from(size.height);

        let bytes_per_row_key: CFString =
            TCFType::wrap_under_get_rule(io_surface::kIOSurfaceBytesPerRow);
        let bytes_per_row_value: CFNumber = CFNumber::from(size.width * 4);

        let bytes_per_elem_key: CFString =
            TCFType::wrap_under_get_rule(io_surface::kIOSurfaceBytesPerElement);
        let bytes_per_elem_value: CFNumber = CFNumber::from(4);

        let is_global_key: CFString =
            TCFType::wrap_under_get_rule(io_surface::kIOSurfaceIsGlobal);
        let is_global_value = CFBoolean::true_value();

        let properties: CFDictionary<CFString, CFType> = CFDictionary::from_CFType_pairs(&[
            (width_key, width_value.as_CFType()),
            (height_key, height_value.as_CFType()),
            (bytes_per_row_key, bytes_per_row_value.as_CFType()),
            (bytes_per_elem_key, bytes_per_elem_value.as_CFType()),
            (is_global_key, is_global_value.as_CFType()),
        ]);
        io_surface::new(&properties)
    }
}

pub struct IOSurfaceSurface {
    platform: PlatformSurface,
    surface: Option<IOSurface>,
}

impl IOSurfaceSurface {
    pub fn new(ctx: &GlContext,
               size: Size2D<i32>,
               has_alpha: bool,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<IOSurfaceSurface, SurfaceError> {
        // CGLTexImageIOSurface2D only binds rectangle textures.
        if !ctx.features().texture_rectangle {
            return Err(SurfaceError::Unsupported {
                mechanism: Mechanism::IOSurface,
                operation: "create",
            });
        }

        let gl = ctx.gl();
        let surface = new_io_surface(size);
        let texture = Texture::new(gl, TextureTarget::TextureTargetRectangle, size);
        {
            let _bound = texture.bind(gl);
            surface.bind_to_gl_texture(size.width, size.height, has_alpha);
        }
        let platform = PlatformSurface::new(ctx, size, ColorAttachment::Texture(texture),
                                            depth_stencil)?;
        Ok(IOSurfaceSurface {
            platform,
            surface: Some(surface),
        })
    }

    pub fn platform(&self) -> &PlatformSurface {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut PlatformSurface {
        &mut self.platform
    }

    pub fn producer_acquire(&mut self, _: &GlContext, _: Duration) {}

    /// IOSurface synchronizes with the window server once commands are flushed.
    pub fn producer_release(&mut self, ctx: &GlContext) {
        ctx.gl().flush();
    }

    pub fn producer_read_acquire(&mut self, _: &GlContext, _: Duration) {}

    pub fn producer_read_release(&mut self, _: &GlContext) {}

    pub fn copy_from_surface(&mut self, ctx: &GlContext, source: &IOSurfaceSurface)
                             -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        let size = self.platform.size();
        let texture = match self.platform.color().texture() {
            Some(texture) => texture,
            None => unreachable!("IOSurface without a rectangle texture"),
        };
        {
            let _bind = ScopedBindFramebuffer::bind(gl, source.platform.framebuffer());
            let _bound = texture.bind(gl);
            gl.copy_tex_sub_image_2d(texture.target.as_gl_target(),
                                     0, 0, 0, 0, 0,
                                     size.width, size.height);
        }
        match ctx.take_error() {
            None => Ok(()),
            Some(error) => Err(SurfaceError::Gl(error)),
        }
    }

    pub fn transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        match self.surface {
            Some(ref surface) => {
                Ok(TransferDescriptor::IOSurface {
                    id: surface.get_id(),
                    size: self.platform.size(),
                })
            }
            None => {
                Err(SurfaceError::Unsupported {
                    mechanism: Mechanism::IOSurface,
                    operation: "transfer descriptor of a destroyed surface",
                })
            }
        }
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        ConsumerLink::default()
    }

    pub fn wait_for_buffer_ownership(&self, _: Duration) {}

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        self.platform.destroy(gl);
        self.surface = None;
    }

    pub fn forget(&mut self) {
        self.platform.forget();
        self.surface = None;
    }
}
