// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The slice of OpenGL the surface layer drives.
//!
//! Everything above this module talks to a `GlDriver`. Production embedders wrap their gleam
//! function table in a `GleamDriver`; headless runs use `soft::SoftGl`.

pub use gleam::gl::*;

use gleam::gl as gleam_gl;
use log::debug;
use std::ffi::c_void;
use std::mem;
use std::rc::Rc;

/// An opaque GPU fence. The value is only meaningful to the driver that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlFence(pub usize);

/// Optional GL functionality the surface layer adapts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlFeatures {
    /// `glBlitFramebuffer` and split draw/read framebuffer bindings.
    pub framebuffer_blit: bool,
    pub framebuffer_multisample: bool,
    /// `glFenceSync` and friends.
    pub sync: bool,
    pub packed_depth_stencil: bool,
    pub texture_rectangle: bool,
}

impl GlFeatures {
    pub fn all() -> GlFeatures {
        GlFeatures {
            framebuffer_blit: true,
            framebuffer_multisample: true,
            sync: true,
            packed_depth_stencil: true,
            texture_rectangle: true,
        }
    }

    /// Roughly what an OpenGL ES 2.0 implementation without extensions offers.
    pub fn minimal() -> GlFeatures {
        GlFeatures {
            framebuffer_blit: false,
            framebuffer_multisample: false,
            sync: false,
            packed_depth_stencil: false,
            texture_rectangle: false,
        }
    }

    /// Derives the feature set from a `GL_VERSION` string and the extension list.
    pub fn probe(version: &str, extensions: &str, is_gles: bool) -> GlFeatures {
        let major = parse_major_version(version);
        let core3 = major >= 3;
        let has = |name: &str| extensions.split_whitespace().any(|ext| ext == name);

        let framebuffer_blit = core3 ||
            has("GL_EXT_framebuffer_blit") ||
            has("GL_ANGLE_framebuffer_blit") ||
            has("GL_NV_framebuffer_blit");
        let framebuffer_multisample = core3 ||
            has("GL_EXT_framebuffer_multisample") ||
            has("GL_ANGLE_framebuffer_multisample");
        let sync = core3 ||
            has("GL_ARB_sync") ||
            has("GL_APPLE_sync");
        let packed_depth_stencil = core3 ||
            has("GL_OES_packed_depth_stencil") ||
            has("GL_EXT_packed_depth_stencil");
        let texture_rectangle = !is_gles &&
            (has("GL_ARB_texture_rectangle") || major >= 3);

        GlFeatures {
            framebuffer_blit,
            framebuffer_multisample: framebuffer_multisample && framebuffer_blit,
            sync,
            packed_depth_stencil,
            texture_rectangle,
        }
    }
}

fn parse_major_version(version: &str) -> u32 {
    // "4.6.0 NVIDIA 535.54" or "OpenGL ES 3.2 Mesa 23.0".
    version
        .split_whitespace()
        .find(|word| word.chars().next().map_or(false, |c| c.is_ascii_digit()))
        .and_then(|word| word.split('.').next())
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

/// The GL entry points used by surfaces, screen buffers and the blit helper.
///
/// Methods mirror their GL namesakes. Implementations record errors the way GL does; callers
/// poll `get_error`.
pub trait GlDriver {
    fn features(&self) -> GlFeatures;

    /// Contexts reporting the same id can see each other's textures.
    fn share_group(&self) -> u64;

    fn get_error(&self) -> GLenum;
    fn get_integer_v(&self, name: GLenum, result: &mut [GLint]);
    fn is_enabled(&self, cap: GLenum) -> bool;
    fn enable(&self, cap: GLenum);
    fn disable(&self, cap: GLenum);
    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);
    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei);
    fn clear_color(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat);
    fn clear(&self, mask: GLbitfield);

    fn gen_framebuffer(&self) -> GLuint;
    fn delete_framebuffer(&self, framebuffer: GLuint);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint);
    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint);
    fn framebuffer_texture_2d(&self,
                              target: GLenum,
                              attachment: GLenum,
                              texture_target: GLenum,
                              texture: GLuint);
    fn check_framebuffer_status(&self, target: GLenum) -> GLenum;
    #[allow(clippy::too_many_arguments)]
    fn blit_framebuffer(&self,
                        src_x0: GLint,
                        src_y0: GLint,
                        src_x1: GLint,
                        src_y1: GLint,
                        dst_x0: GLint,
                        dst_y0: GLint,
                        dst_x1: GLint,
                        dst_y1: GLint,
                        mask: GLbitfield,
                        filter: GLenum);

    fn gen_renderbuffer(&self) -> GLuint;
    fn delete_renderbuffer(&self, renderbuffer: GLuint);
    fn bind_renderbuffer(&self, renderbuffer: GLuint);
    /// `samples == 0` allocates single-sampled storage.
    fn renderbuffer_storage(&self,
                            samples: GLsizei,
                            internal_format: GLenum,
                            width: GLsizei,
                            height: GLsizei);

    fn gen_texture(&self) -> GLuint;
    fn delete_texture(&self, texture: GLuint);
    fn active_texture(&self, unit: GLenum);
    fn bind_texture(&self, target: GLenum, texture: GLuint);
    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(&self,
                    target: GLenum,
                    internal_format: GLint,
                    width: GLsizei,
                    height: GLsizei,
                    format: GLenum,
                    ty: GLenum,
                    data: Option<&[u8]>);
    #[allow(clippy::too_many_arguments)]
    fn copy_tex_image_2d(&self,
                         target: GLenum,
                         level: GLint,
                         internal_format: GLenum,
                         x: GLint,
                         y: GLint,
                         width: GLsizei,
                         height: GLsizei);
    #[allow(clippy::too_many_arguments)]
    fn copy_tex_sub_image_2d(&self,
                             target: GLenum,
                             level: GLint,
                             x_offset: GLint,
                             y_offset: GLint,
                             x: GLint,
                             y: GLint,
                             width: GLsizei,
                             height: GLsizei);
    #[allow(clippy::too_many_arguments)]
    fn read_pixels(&self,
                   x: GLint,
                   y: GLint,
                   width: GLsizei,
                   height: GLsizei,
                   format: GLenum,
                   ty: GLenum,
                   dst: &mut [u8]);

    /// Returns `None` when the driver could not create the fence.
    fn fence_sync(&self) -> Option<GlFence>;
    /// Flushes and blocks the calling thread for up to `timeout_ns`.
    fn client_wait_sync(&self, fence: GlFence, timeout_ns: u64) -> GLenum;
    /// Makes the server wait for the fence before executing further commands.
    fn wait_sync(&self, fence: GlFence);
    fn delete_sync(&self, fence: GlFence);
    fn flush(&self);
    fn finish(&self);

    fn create_shader(&self, shader_type: GLenum) -> GLuint;
    fn shader_source(&self, shader: GLuint, source: &str);
    fn compile_shader(&self, shader: GLuint);
    fn get_shader_iv(&self, shader: GLuint, pname: GLenum) -> GLint;
    fn get_shader_info_log(&self, shader: GLuint) -> String;
    fn delete_shader(&self, shader: GLuint);
    fn create_program(&self) -> GLuint;
    fn attach_shader(&self, program: GLuint, shader: GLuint);
    fn link_program(&self, program: GLuint);
    fn get_program_iv(&self, program: GLuint, pname: GLenum) -> GLint;
    fn use_program(&self, program: GLuint);
    fn delete_program(&self, program: GLuint);
    fn get_attrib_location(&self, program: GLuint, name: &str) -> GLint;
    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint;
    fn uniform_1i(&self, location: GLint, v0: GLint);
    fn uniform_2f(&self, location: GLint, v0: GLfloat, v1: GLfloat);

    fn gen_buffer(&self) -> GLuint;
    fn delete_buffer(&self, buffer: GLuint);
    fn bind_buffer(&self, target: GLenum, buffer: GLuint);
    fn buffer_data_f32(&self, target: GLenum, data: &[f32], usage: GLenum);
    fn enable_vertex_attrib_array(&self, index: GLuint);
    fn disable_vertex_attrib_array(&self, index: GLuint);
    fn vertex_attrib_pointer_f32(&self, index: GLuint, size: GLint, stride: GLsizei, offset: GLuint);
    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei);

    fn get_integer(&self, name: GLenum) -> GLint {
        let mut result = [0];
        self.get_integer_v(name, &mut result);
        result[0]
    }
}

type RenderbufferStorageMultisampleFn =
    unsafe extern "system" fn(GLenum, GLsizei, GLenum, GLsizei, GLsizei);

/// A `GlDriver` backed by a gleam function table.
pub struct GleamDriver {
    gl: Rc<dyn gleam_gl::Gl>,
    features: GlFeatures,
    share_group: u64,
    // gleam does not expose glRenderbufferStorageMultisample.
    renderbuffer_storage_multisample: Option<RenderbufferStorageMultisampleFn>,
}

impl GleamDriver {
    /// Loads the function table through `loader`, which must resolve symbols for the context
    /// that is current on this thread.
    ///
    /// # Safety
    ///
    /// `loader` must return valid entry points (or null) for the current context.
    pub unsafe fn load_with<F>(is_gles: bool, share_group: u64, mut loader: F) -> GleamDriver
        where F: FnMut(&str) -> *const c_void
    {
        let mut multisample = loader("glRenderbufferStorageMultisample");
        if multisample.is_null() {
            multisample = loader("glRenderbufferStorageMultisampleEXT");
        }
        if multisample.is_null() {
            multisample = loader("glRenderbufferStorageMultisampleANGLE");
        }
        let renderbuffer_storage_multisample = if multisample.is_null() {
            None
        } else {
            Some(mem::transmute::<*const c_void, RenderbufferStorageMultisampleFn>(multisample))
        };

        let gl = if is_gles {
            gleam_gl::GlesFns::load_with(loader)
        } else {
            gleam_gl::GlFns::load_with(loader)
        };

        let mut driver = GleamDriver::new(gl, share_group);
        driver.renderbuffer_storage_multisample = renderbuffer_storage_multisample;
        if driver.renderbuffer_storage_multisample.is_none() {
            driver.features.framebuffer_multisample = false;
        }
        driver
    }

    /// Wraps an already loaded table. Multisampled renderbuffers are unavailable through this
    /// constructor.
    pub fn new(gl: Rc<dyn gleam_gl::Gl>, share_group: u64) -> GleamDriver {
        let is_gles = matches!(gl.get_type(), gleam_gl::GlType::Gles);
        let version = gl.get_string(gleam_gl::VERSION);
        let extensions = gl.get_string(gleam_gl::EXTENSIONS);
        // Core profiles reject GL_EXTENSIONS through glGetString.
        let _ = gl.get_error();
        let mut features = GlFeatures::probe(&version, &extensions, is_gles);
        features.framebuffer_multisample = false;
        debug!("GleamDriver: {} ({:?})", version, features);

        GleamDriver {
            gl,
            features,
            share_group,
            renderbuffer_storage_multisample: None,
        }
    }

    pub fn gl(&self) -> &Rc<dyn gleam_gl::Gl> {
        &self.gl
    }
}

impl GlDriver for GleamDriver {
    fn features(&self) -> GlFeatures {
        self.features
    }

    fn share_group(&self) -> u64 {
        self.share_group
    }

    fn get_error(&self) -> GLenum {
        self.gl.get_error()
    }

    #[allow(unused_unsafe)]
    fn get_integer_v(&self, name: GLenum, result: &mut [GLint]) {
        unsafe { self.gl.get_integer_v(name, result) }
    }

    fn is_enabled(&self, cap: GLenum) -> bool {
        self.gl.is_enabled(cap) != 0
    }

    fn enable(&self, cap: GLenum) {
        self.gl.enable(cap)
    }

    fn disable(&self, cap: GLenum) {
        self.gl.disable(cap)
    }

    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.gl.scissor(x, y, width, height)
    }

    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        self.gl.viewport(x, y, width, height)
    }

    fn clear_color(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat) {
        self.gl.clear_color(r, g, b, a)
    }

    fn clear(&self, mask: GLbitfield) {
        self.gl.clear(mask)
    }

    fn gen_framebuffer(&self) -> GLuint {
        self.gl.gen_framebuffers(1)[0]
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        self.gl.delete_framebuffers(&[framebuffer])
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        self.gl.bind_framebuffer(target, framebuffer)
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint) {
        self.gl.framebuffer_renderbuffer(target, attachment, gleam_gl::RENDERBUFFER, renderbuffer)
    }

    fn framebuffer_texture_2d(&self,
                              target: GLenum,
                              attachment: GLenum,
                              texture_target: GLenum,
                              texture: GLuint) {
        self.gl.framebuffer_texture_2d(target, attachment, texture_target, texture, 0)
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        self.gl.check_frame_buffer_status(target)
    }

    fn blit_framebuffer(&self,
                        src_x0: GLint,
                        src_y0: GLint,
                        src_x1: GLint,
                        src_y1: GLint,
                        dst_x0: GLint,
                        dst_y0: GLint,
                        dst_x1: GLint,
                        dst_y1: GLint,
                        mask: GLbitfield,
                        filter: GLenum) {
        self.gl.blit_framebuffer(src_x0, src_y0, src_x1, src_y1,
                                 dst_x0, dst_y0, dst_x1, dst_y1,
                                 mask, filter)
    }

    fn gen_renderbuffer(&self) -> GLuint {
        self.gl.gen_renderbuffers(1)[0]
    }

    fn delete_renderbuffer(&self, renderbuffer: GLuint) {
        self.gl.delete_renderbuffers(&[renderbuffer])
    }

    fn bind_renderbuffer(&self, renderbuffer: GLuint) {
        self.gl.bind_renderbuffer(gleam_gl::RENDERBUFFER, renderbuffer)
    }

    fn renderbuffer_storage(&self,
                            samples: GLsizei,
                            internal_format: GLenum,
                            width: GLsizei,
                            height: GLsizei) {
        match self.renderbuffer_storage_multisample {
            Some(storage_multisample) if samples > 0 => unsafe {
                storage_multisample(gleam_gl::RENDERBUFFER, samples, internal_format, width, height)
            },
            _ => {
                self.gl.renderbuffer_storage(gleam_gl::RENDERBUFFER, internal_format, width, height)
            }
        }
    }

    fn gen_texture(&self) -> GLuint {
        self.gl.gen_textures(1)[0]
    }

    fn delete_texture(&self, texture: GLuint) {
        self.gl.delete_textures(&[texture])
    }

    fn active_texture(&self, unit: GLenum) {
        self.gl.active_texture(unit)
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        self.gl.bind_texture(target, texture)
    }

    fn tex_parameter_i(&self, target: GLenum, pname: GLenum, param: GLint) {
        self.gl.tex_parameter_i(target, pname, param)
    }

    fn tex_image_2d(&self,
                    target: GLenum,
                    internal_format: GLint,
                    width: GLsizei,
                    height: GLsizei,
                    format: GLenum,
                    ty: GLenum,
                    data: Option<&[u8]>) {
        self.gl.tex_image_2d(target, 0, internal_format, width, height, 0, format, ty, data)
    }

    fn copy_tex_image_2d(&self,
                         target: GLenum,
                         level: GLint,
                         internal_format: GLenum,
                         x: GLint,
                         y: GLint,
                         width: GLsizei,
                         height: GLsizei) {
        self.gl.copy_tex_image_2d(target, level, internal_format, x, y, width, height, 0)
    }

    fn copy_tex_sub_image_2d(&self,
                             target: GLenum,
                             level: GLint,
                             x_offset: GLint,
                             y_offset: GLint,
                             x: GLint,
                             y: GLint,
                             width: GLsizei,
                             height: GLsizei) {
        self.gl.copy_tex_sub_image_2d(target, level, x_offset, y_offset, x, y, width, height)
    }

    fn read_pixels(&self,
                   x: GLint,
                   y: GLint,
                   width: GLsizei,
                   height: GLsizei,
                   format: GLenum,
                   ty: GLenum,
                   dst: &mut [u8]) {
        self.gl.read_pixels_into_buffer(x, y, width, height, format, ty, dst)
    }

    fn fence_sync(&self) -> Option<GlFence> {
        let sync = self.gl.fence_sync(gleam_gl::SYNC_GPU_COMMANDS_COMPLETE, 0);
        if sync.is_null() {
            None
        } else {
            Some(GlFence(sync as usize))
        }
    }

    fn client_wait_sync(&self, fence: GlFence, timeout_ns: u64) -> GLenum {
        self.gl.client_wait_sync(fence.0 as gleam_gl::GLsync,
                                 gleam_gl::SYNC_FLUSH_COMMANDS_BIT,
                                 timeout_ns)
    }

    fn wait_sync(&self, fence: GlFence) {
        self.gl.wait_sync(fence.0 as gleam_gl::GLsync, 0, gleam_gl::TIMEOUT_IGNORED)
    }

    fn delete_sync(&self, fence: GlFence) {
        self.gl.delete_sync(fence.0 as gleam_gl::GLsync)
    }

    fn flush(&self) {
        self.gl.flush()
    }

    fn finish(&self) {
        self.gl.finish()
    }

    fn create_shader(&self, shader_type: GLenum) -> GLuint {
        self.gl.create_shader(shader_type)
    }

    fn shader_source(&self, shader: GLuint, source: &str) {
        self.gl.shader_source(shader, &[source.as_bytes()])
    }

    fn compile_shader(&self, shader: GLuint) {
        self.gl.compile_shader(shader)
    }

    #[allow(unused_unsafe)]
    fn get_shader_iv(&self, shader: GLuint, pname: GLenum) -> GLint {
        let mut result = [0];
        unsafe { self.gl.get_shader_iv(shader, pname, &mut result) };
        result[0]
    }

    fn get_shader_info_log(&self, shader: GLuint) -> String {
        self.gl.get_shader_info_log(shader)
    }

    fn delete_shader(&self, shader: GLuint) {
        self.gl.delete_shader(shader)
    }

    fn create_program(&self) -> GLuint {
        self.gl.create_program()
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        self.gl.attach_shader(program, shader)
    }

    fn link_program(&self, program: GLuint) {
        self.gl.link_program(program)
    }

    #[allow(unused_unsafe)]
    fn get_program_iv(&self, program: GLuint, pname: GLenum) -> GLint {
        let mut result = [0];
        unsafe { self.gl.get_program_iv(program, pname, &mut result) };
        result[0]
    }

    fn use_program(&self, program: GLuint) {
        self.gl.use_program(program)
    }

    fn delete_program(&self, program: GLuint) {
        self.gl.delete_program(program)
    }

    fn get_attrib_location(&self, program: GLuint, name: &str) -> GLint {
        self.gl.get_attrib_location(program, name)
    }

    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint {
        self.gl.get_uniform_location(program, name)
    }

    fn uniform_1i(&self, location: GLint, v0: GLint) {
        self.gl.uniform_1i(location, v0)
    }

    fn uniform_2f(&self, location: GLint, v0: GLfloat, v1: GLfloat) {
        self.gl.uniform_2f(location, v0, v1)
    }

    fn gen_buffer(&self) -> GLuint {
        self.gl.gen_buffers(1)[0]
    }

    fn delete_buffer(&self, buffer: GLuint) {
        self.gl.delete_buffers(&[buffer])
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        self.gl.bind_buffer(target, buffer)
    }

    fn buffer_data_f32(&self, target: GLenum, data: &[f32], usage: GLenum) {
        gleam_gl::buffer_data(&*self.gl, target, data, usage)
    }

    fn enable_vertex_attrib_array(&self, index: GLuint) {
        self.gl.enable_vertex_attrib_array(index)
    }

    fn disable_vertex_attrib_array(&self, index: GLuint) {
        self.gl.disable_vertex_attrib_array(index)
    }

    fn vertex_attrib_pointer_f32(&self, index: GLuint, size: GLint, stride: GLsizei, offset: GLuint) {
        self.gl.vertex_attrib_pointer(index, size, gleam_gl::FLOAT, false, stride, offset)
    }

    fn draw_arrays(&self, mode: GLenum, first: GLint, count: GLsizei) {
        self.gl.draw_arrays(mode, first, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_desktop_core_profile() {
        let features = GlFeatures::probe("4.6.0 NVIDIA 535.54", "", false);
        assert!(features.framebuffer_blit);
        assert!(features.sync);
        assert!(features.texture_rectangle);
    }

    #[test]
    fn probes_gles2_extensions() {
        let features = GlFeatures::probe("OpenGL ES 2.0 Mesa",
                                         "GL_OES_packed_depth_stencil GL_ANGLE_framebuffer_blit",
                                         true);
        assert!(features.framebuffer_blit);
        assert!(!features.framebuffer_multisample);
        assert!(!features.sync);
        assert!(features.packed_depth_stencil);
        assert!(!features.texture_rectangle);
    }

    #[test]
    fn unparseable_version_is_minimal() {
        assert_eq!(GlFeatures::probe("garbage", "", true), GlFeatures::minimal());
    }
}
