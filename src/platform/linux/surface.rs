// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Implementation of shareable surfaces for Linux. This uses X pixmaps bound to textures with
//! `GLX_EXT_texture_from_pixmap`.

#![allow(non_snake_case)]

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{ColorAttachment, DepthStencilBuffers, PlatformSurface};
use crate::gl::GlDriver;
use crate::platform::surface::{Mechanism, TransferDescriptor};
use crate::sync::ConsumerLink;
use crate::texturegl::{Texture, TextureTarget};

use euclid::default::Size2D;
use libc::{c_int, c_uint};
use log::debug;
use std::ffi::CStr;
use std::mem;
use std::ptr;
use std::time::Duration;
use x11::glx;
use x11::xlib;

// GLX_EXT_texture_from_pixmap.
const GLX_BIND_TO_TEXTURE_RGBA_EXT: c_int = 0x20D1;
const GLX_TEXTURE_FORMAT_EXT: c_int = 0x20D5;
const GLX_TEXTURE_TARGET_EXT: c_int = 0x20D6;
const GLX_TEXTURE_FORMAT_RGB_EXT: c_int = 0x20D9;
const GLX_TEXTURE_FORMAT_RGBA_EXT: c_int = 0x20DA;
const GLX_TEXTURE_2D_EXT: c_int = 0x20DC;
const GLX_FRONT_EXT: c_int = 0x20DE;

type BindTexImageFn = unsafe extern "C" fn(*mut xlib::Display, glx::GLXDrawable, c_int, *const c_int);
type ReleaseTexImageFn = unsafe extern "C" fn(*mut xlib::Display, glx::GLXDrawable, c_int);

/// The X display and the framebuffer configuration pixmaps are created with. This holds only a
/// *weak* reference to the display and does not close it.
#[derive(Clone, Copy, Debug)]
pub struct NativeDisplay {
    display: *mut xlib::Display,
    framebuffer_configuration: Option<glx::GLXFBConfig>,
}

unsafe impl Send for NativeDisplay {}
unsafe impl Sync for NativeDisplay {}

impl NativeDisplay {
    /// # Safety
    ///
    /// `display` must be an open connection that outlives every surface created with it.
    pub unsafe fn new(display: *mut xlib::Display) -> NativeDisplay {
        NativeDisplay {
            display,
            framebuffer_configuration: NativeDisplay::choose_configuration(display),
        }
    }

    pub fn display(&self) -> *mut xlib::Display {
        self.display
    }

    unsafe fn choose_configuration(display: *mut xlib::Display) -> Option<glx::GLXFBConfig> {
        // A null display means we are headless.
        if display.is_null() {
            return None;
        }

        let fbconfig_attributes = [
            glx::GLX_DOUBLEBUFFER, 0,
            glx::GLX_DRAWABLE_TYPE, glx::GLX_PIXMAP_BIT | glx::GLX_WINDOW_BIT,
            GLX_BIND_TO_TEXTURE_RGBA_EXT, 1,
            glx::GLX_RENDER_TYPE, glx::GLX_RGBA_BIT,
            glx::GLX_ALPHA_SIZE, 8,
            0
        ];

        let screen = xlib::XDefaultScreen(display);
        let mut number_of_configs = 0;
        let configs = glx::glXChooseFBConfig(display,
                                             screen,
                                             fbconfig_attributes.as_ptr(),
                                             &mut number_of_configs);
        if configs.is_null() || number_of_configs == 0 {
            debug!("glXChooseFBConfig returned no configurations");
            return None;
        }

        let need_32_bit_visual = NativeDisplay::need_to_find_32_bit_depth_visual(display);
        let mut chosen = None;
        for i in 0..number_of_configs as isize {
            let config = *configs.offset(i);
            if !need_32_bit_visual {
                chosen = Some(config);
                break;
            }

            // NVidia (and AMD/ATI) drivers have RGBA configurations that use 24-bit
            // XVisual, not capable of representing an alpha-channel in Pixmap form,
            // so we look for the configuration with a full set of 32 bits.
            let visual = glx::glXGetVisualFromFBConfig(display, config);
            if visual.is_null() {
                continue;
            }
            let depth = (*visual).depth;
            xlib::XFree(visual as *mut _);
            if depth == 32 {
                chosen = Some(config);
                break;
            }
        }
        xlib::XFree(configs as *mut _);
        chosen
    }

    unsafe fn need_to_find_32_bit_depth_visual(display: *mut xlib::Display) -> bool {
        let glx_vendor = glx::glXGetClientString(display, glx::GLX_VENDOR);
        if glx_vendor.is_null() {
            return false;
        }
        let glx_vendor = CStr::from_ptr(glx_vendor).to_string_lossy().to_ascii_lowercase();
        glx_vendor.contains("nvidia") || glx_vendor.contains("ati")
    }
}

unsafe fn load_glx_function(name: &[u8]) -> Option<unsafe extern "C" fn()> {
    glx::glXGetProcAddress(name.as_ptr())
}

pub struct PixmapSurface {
    platform: PlatformSurface,
    display: NativeDisplay,
    pixmap: xlib::Pixmap,
    glx_pixmap: glx::GLXPixmap,
    release_tex_image: ReleaseTexImageFn,
}

impl PixmapSurface {
    pub fn new(ctx: &GlContext,
               display: &NativeDisplay,
               size: Size2D<i32>,
               has_alpha: bool,
               depth_stencil: Option<&DepthStencilBuffers>)
               -> Result<PixmapSurface, SurfaceError> {
        let unsupported = SurfaceError::Unsupported {
            mechanism: Mechanism::Pixmap,
            operation: "create",
        };
        let framebuffer_configuration = match display.framebuffer_configuration {
            Some(configuration) => configuration,
            None => return Err(unsupported),
        };

        unsafe {
            let (bind_tex_image, release_tex_image) =
                match (load_glx_function(b"glXBindTexImageEXT\0"),
                       load_glx_function(b"glXReleaseTexImageEXT\0")) {
                    (Some(bind), Some(release)) => {
                        (mem::transmute::<unsafe extern "C" fn(), BindTexImageFn>(bind),
                         mem::transmute::<unsafe extern "C" fn(), ReleaseTexImageFn>(release))
                    }
                    _ => return Err(unsupported),
                };

            let screen = xlib::XDefaultScreen(display.display);
            let window = xlib::XRootWindow(display.display, screen);
            // The X server we use for testing on build machines always returns
            // visuals that report 24 bit depth. But creating a 32 bit pixmap does work, so
            // hard code the depth here.
            let pixmap = xlib::XCreatePixmap(display.display,
                                             window,
                                             size.width as c_uint,
                                             size.height as c_uint,
                                             32);

            let format = if has_alpha { GLX_TEXTURE_FORMAT_RGBA_EXT } else { GLX_TEXTURE_FORMAT_RGB_EXT };
            let pixmap_attributes = [
                GLX_TEXTURE_TARGET_EXT, GLX_TEXTURE_2D_EXT,
                GLX_TEXTURE_FORMAT_EXT, format,
                0
            ];
            let glx_pixmap = glx::glXCreatePixmap(display.display,
                                                  framebuffer_configuration,
                                                  pixmap,
                                                  pixmap_attributes.as_ptr());

            let gl = ctx.gl();
            let texture = Texture::new(gl, TextureTarget::TextureTarget2D, size);
            {
                let _bound = texture.bind(gl);
                bind_tex_image(display.display, glx_pixmap, GLX_FRONT_EXT, ptr::null());
            }

            match PlatformSurface::new(ctx, size, ColorAttachment::Texture(texture), depth_stencil) {
                Ok(platform) => {
                    debug!("PixmapSurface::new: pixmap {:#x} ({}x{})", pixmap, size.width, size.height);
                    Ok(PixmapSurface {
                        platform,
                        display: *display,
                        pixmap,
                        glx_pixmap,
                        release_tex_image,
                    })
                }
                Err(error) => {
                    release_tex_image(display.display, glx_pixmap, GLX_FRONT_EXT);
                    glx::glXDestroyPixmap(display.display, glx_pixmap);
                    xlib::XFreePixmap(display.display, pixmap);
                    Err(error)
                }
            }
        }
    }

    pub fn platform(&self) -> &PlatformSurface {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut PlatformSurface {
        &mut self.platform
    }

    pub fn producer_acquire(&mut self, _: &GlContext, _: Duration) {}

    /// The X server sees the pixmap once GL has finished and the request queue is flushed.
    pub fn producer_release(&mut self, ctx: &GlContext) {
        ctx.gl().finish();
        unsafe {
            xlib::XSync(self.display.display, xlib::False);
        }
    }

    pub fn producer_read_acquire(&mut self, _: &GlContext, _: Duration) {}

    pub fn producer_read_release(&mut self, _: &GlContext) {}

    pub fn transfer_descriptor(&self) -> Result<TransferDescriptor, SurfaceError> {
        Ok(TransferDescriptor::Pixmap {
            pixmap: self.pixmap as u64,
            size: self.platform.size(),
        })
    }

    pub fn consumer_link(&self) -> ConsumerLink {
        ConsumerLink::default()
    }

    pub fn wait_for_buffer_ownership(&self, _: Duration) {}

    fn free_pixmaps(&mut self) {
        if self.pixmap == 0 {
            return;
        }
        unsafe {
            (self.release_tex_image)(self.display.display, self.glx_pixmap, GLX_FRONT_EXT);
            glx::glXDestroyPixmap(self.display.display, self.glx_pixmap);
            xlib::XFreePixmap(self.display.display, self.pixmap);
        }
        self.pixmap = 0;
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        self.platform.destroy(gl);
        self.free_pixmaps();
    }

    /// The pixmap belongs to the X server, not the lost context, so it is still freed.
    pub fn forget(&mut self) {
        self.platform.forget();
        self.free_pixmaps();
    }
}
