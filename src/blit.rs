// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! GPU-side copies between framebuffers and textures.
//!
//! `glBlitFramebuffer` is used whenever it can express the copy. Everything else draws a
//! textured quad with one of a handful of lazily compiled programs.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{DrawBuffer, PlatformSurface, ScopedBindFramebuffer};
use crate::framebuffer::{ScopedFramebufferForTexture, ScopedGlState};
use crate::gl::{self, GLenum, GLint, GLuint, GlDriver};
use crate::texturegl::{Texture, TextureTarget};

use euclid::default::Size2D;
use log::{debug, error};
use std::collections::HashMap;

static VERTEX_SHADER_SOURCE: &str = "
    attribute vec2 aPosition;

    varying vec2 vTextureCoord;

    void main(void) {
        gl_Position = vec4(aPosition * 2.0 - 1.0, 0.0, 1.0);
        vTextureCoord = aPosition;
    }
";

static FRAGMENT_2D_SHADER_SOURCE: &str = "
    #ifdef GL_ES
        precision mediump float;
    #endif

    varying vec2 vTextureCoord;

    uniform sampler2D uSampler;

    void main(void) {
        gl_FragColor = texture2D(uSampler, vTextureCoord)SWIZZLE;
    }
";

static FRAGMENT_RECTANGLE_SHADER_SOURCE: &str = "
    #ifdef GL_ES
        precision mediump float;
    #endif

    varying vec2 vTextureCoord;

    uniform sampler2DRect uSampler;
    uniform vec2 uSize;

    void main(void) {
        gl_FragColor = texture2DRect(uSampler, vTextureCoord * uSize)SWIZZLE;
    }
";

static QUAD_VERTICES: [f32; 8] = [
    0.0, 0.0,
    0.0, 1.0,
    1.0, 0.0,
    1.0, 1.0,
];

/// What happens to texels on the way through a quad blit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConvertMode {
    Copy,
    /// BGRA to RGBA and back.
    SwapRedBlue,
}

fn fragment_shader_source(target: TextureTarget, mode: ConvertMode) -> String {
    let swizzle = match mode {
        ConvertMode::Copy => "",
        ConvertMode::SwapRedBlue => ".bgra",
    };
    let template = match target {
        TextureTarget::TextureTarget2D => FRAGMENT_2D_SHADER_SOURCE,
        TextureTarget::TextureTargetRectangle => FRAGMENT_RECTANGLE_SHADER_SOURCE,
    };
    template.replace("SWIZZLE", swizzle)
}

fn load_shader(gl: &dyn GlDriver, source_string: &str, shader_type: GLenum)
               -> Result<GLuint, SurfaceError> {
    let shader_id = gl.create_shader(shader_type);
    gl.shader_source(shader_id, source_string);
    gl.compile_shader(shader_id);

    if gl.get_shader_iv(shader_id, gl::COMPILE_STATUS) == 0 {
        error!("shader info log: {}", gl.get_shader_info_log(shader_id));
        gl.delete_shader(shader_id);
        return Err(SurfaceError::Gl(gl::INVALID_OPERATION));
    }
    Ok(shader_id)
}

fn check_error(ctx: &GlContext) -> Result<(), SurfaceError> {
    match ctx.take_error() {
        None => Ok(()),
        Some(error) => Err(SurfaceError::Gl(error)),
    }
}

#[derive(Clone, Copy, Debug)]
struct BlitProgram {
    id: GLuint,
    fragment_shader: GLuint,
    position_attr: GLuint,
    sampler_uniform: GLint,
    size_uniform: GLint,
}

/// Per-context blit state. Lives in the `GlContext` and owns only GL names of that context.
#[derive(Debug, Default)]
pub struct BlitHelper {
    vertex_shader: Option<GLuint>,
    quad_buffer: Option<GLuint>,
    programs: HashMap<(TextureTarget, ConvertMode), BlitProgram>,
}

impl BlitHelper {
    pub fn new() -> BlitHelper {
        BlitHelper::default()
    }

    /// How many quad programs have been compiled so far.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn program(&mut self, gl: &dyn GlDriver, target: TextureTarget, mode: ConvertMode)
               -> Result<BlitProgram, SurfaceError> {
        if let Some(program) = self.programs.get(&(target, mode)) {
            return Ok(*program);
        }

        let vertex_shader = match self.vertex_shader {
            Some(shader) => shader,
            None => {
                let shader = load_shader(gl, VERTEX_SHADER_SOURCE, gl::VERTEX_SHADER)?;
                self.vertex_shader = Some(shader);
                shader
            }
        };
        let fragment_shader = load_shader(gl,
                                          &fragment_shader_source(target, mode),
                                          gl::FRAGMENT_SHADER)?;

        let id = gl.create_program();
        gl.attach_shader(id, vertex_shader);
        gl.attach_shader(id, fragment_shader);
        gl.link_program(id);
        if gl.get_program_iv(id, gl::LINK_STATUS) == 0 {
            error!("failed to link the {:?}/{:?} blit program", target, mode);
            gl.delete_program(id);
            gl.delete_shader(fragment_shader);
            return Err(SurfaceError::Gl(gl::INVALID_OPERATION));
        }

        let program = BlitProgram {
            id,
            fragment_shader,
            position_attr: gl.get_attrib_location(id, "aPosition") as GLuint,
            sampler_uniform: gl.get_uniform_location(id, "uSampler"),
            size_uniform: gl.get_uniform_location(id, "uSize"),
        };
        debug!("BlitHelper: compiled {:?}/{:?} program {}", target, mode, id);
        self.programs.insert((target, mode), program);
        Ok(program)
    }

    fn quad_buffer(&mut self, gl: &dyn GlDriver) -> GLuint {
        match self.quad_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = gl.gen_buffer();
                let old_buffer = gl.get_integer(gl::ARRAY_BUFFER_BINDING) as GLuint;
                gl.bind_buffer(gl::ARRAY_BUFFER, buffer);
                gl.buffer_data_f32(gl::ARRAY_BUFFER, &QUAD_VERTICES, gl::STATIC_DRAW);
                gl.bind_buffer(gl::ARRAY_BUFFER, old_buffer);
                self.quad_buffer = Some(buffer);
                buffer
            }
        }
    }

    /// Copies the color of `source` into `destination`, stretching if the sizes differ. The
    /// application's scissor box never clips the copy and its bindings survive it.
    pub fn blit_framebuffer_to_framebuffer(&mut self,
                                           ctx: &GlContext,
                                           source: GLuint,
                                           destination: GLuint,
                                           source_size: Size2D<i32>,
                                           destination_size: Size2D<i32>)
                                           -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        if !ctx.features().framebuffer_blit {
            return Err(SurfaceError::Gl(gl::INVALID_OPERATION));
        }

        let filter = if source_size == destination_size { gl::NEAREST } else { gl::LINEAR };
        {
            let _scissor = ScopedGlState::new(gl, gl::SCISSOR_TEST, false);
            let _bind = ScopedBindFramebuffer::new(gl);
            gl.bind_framebuffer(gl::READ_FRAMEBUFFER, source);
            gl.bind_framebuffer(gl::DRAW_FRAMEBUFFER, destination);
            gl.blit_framebuffer(0, 0, source_size.width, source_size.height,
                                0, 0, destination_size.width, destination_size.height,
                                gl::COLOR_BUFFER_BIT,
                                filter);
        }
        check_error(ctx)
    }

    /// Draws `texture` over all of `destination`.
    pub fn blit_texture_to_framebuffer(&mut self,
                                       ctx: &GlContext,
                                       texture: &Texture,
                                       destination: GLuint,
                                       destination_size: Size2D<i32>,
                                       mode: ConvertMode)
                                       -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        if mode == ConvertMode::Copy &&
                texture.target == TextureTarget::TextureTarget2D &&
                ctx.features().framebuffer_blit {
            let source = ScopedFramebufferForTexture::new(gl, texture);
            return self.blit_framebuffer_to_framebuffer(ctx,
                                                        source.framebuffer(),
                                                        destination,
                                                        texture.size,
                                                        destination_size);
        }

        self.draw_quad(ctx, texture, destination, destination_size, mode)?;
        check_error(ctx)
    }

    fn draw_quad(&mut self,
                 ctx: &GlContext,
                 texture: &Texture,
                 destination: GLuint,
                 destination_size: Size2D<i32>,
                 mode: ConvertMode)
                 -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        let program = self.program(gl, texture.target, mode)?;
        let quad_buffer = self.quad_buffer(gl);
        let target = texture.target.as_gl_target();
        let binding_query = match texture.target {
            TextureTarget::TextureTarget2D => gl::TEXTURE_BINDING_2D,
            TextureTarget::TextureTargetRectangle => gl::TEXTURE_BINDING_RECTANGLE,
        };

        let _scissor = ScopedGlState::new(gl, gl::SCISSOR_TEST, false);
        let _blend = ScopedGlState::new(gl, gl::BLEND, false);
        let _depth = ScopedGlState::new(gl, gl::DEPTH_TEST, false);
        let _stencil = ScopedGlState::new(gl, gl::STENCIL_TEST, false);
        let _bind = ScopedBindFramebuffer::bind(gl, destination);

        let mut old_viewport = [0; 4];
        gl.get_integer_v(gl::VIEWPORT, &mut old_viewport);
        let old_program = gl.get_integer(gl::CURRENT_PROGRAM) as GLuint;
        let old_active_texture = gl.get_integer(gl::ACTIVE_TEXTURE) as GLenum;
        let old_array_buffer = gl.get_integer(gl::ARRAY_BUFFER_BINDING) as GLuint;

        gl.active_texture(gl::TEXTURE0);
        let old_texture = gl.get_integer(binding_query) as GLuint;

        gl.viewport(0, 0, destination_size.width, destination_size.height);
        gl.use_program(program.id);
        gl.bind_texture(target, texture.native_texture());
        gl.uniform_1i(program.sampler_uniform, 0);
        if texture.target == TextureTarget::TextureTargetRectangle {
            gl.uniform_2f(program.size_uniform,
                          texture.size.width as f32,
                          texture.size.height as f32);
        }
        gl.bind_buffer(gl::ARRAY_BUFFER, quad_buffer);
        gl.enable_vertex_attrib_array(program.position_attr);
        gl.vertex_attrib_pointer_f32(program.position_attr, 2, 0, 0);

        gl.draw_arrays(gl::TRIANGLE_STRIP, 0, 4);

        gl.disable_vertex_attrib_array(program.position_attr);
        gl.bind_buffer(gl::ARRAY_BUFFER, old_array_buffer);
        gl.bind_texture(target, old_texture);
        gl.active_texture(old_active_texture);
        gl.use_program(old_program);
        gl.viewport(old_viewport[0], old_viewport[1], old_viewport[2], old_viewport[3]);
        Ok(())
    }

    /// Copies the color of `source` into the whole of `texture`.
    pub fn blit_framebuffer_to_texture(&mut self,
                                       ctx: &GlContext,
                                       source: GLuint,
                                       texture: &Texture,
                                       source_size: Size2D<i32>)
                                       -> Result<(), SurfaceError> {
        let gl = ctx.gl();
        if ctx.features().framebuffer_blit {
            let destination = ScopedFramebufferForTexture::new(gl, texture);
            return self.blit_framebuffer_to_framebuffer(ctx,
                                                        source,
                                                        destination.framebuffer(),
                                                        source_size,
                                                        texture.size);
        }

        {
            let _bind = ScopedBindFramebuffer::bind(gl, source);
            let _bound = texture.bind(gl);
            gl.copy_tex_sub_image_2d(texture.target.as_gl_target(),
                                     0, 0, 0, 0, 0,
                                     texture.size.width.min(source_size.width),
                                     texture.size.height.min(source_size.height));
        }
        check_error(ctx)
    }

    /// Copies one surface's color into another of the same size through whichever path the
    /// driver and the two color attachments allow.
    pub fn copy_surface(&mut self,
                        ctx: &GlContext,
                        source: &PlatformSurface,
                        destination: &PlatformSurface)
                        -> Result<(), SurfaceError> {
        let size = source.size();
        if ctx.features().framebuffer_blit {
            return self.blit_framebuffer_to_framebuffer(ctx,
                                                        source.framebuffer(),
                                                        destination.framebuffer(),
                                                        size,
                                                        destination.size());
        }

        match (source.color().texture(), destination.color().texture()) {
            (_, Some(texture)) => {
                self.blit_framebuffer_to_texture(ctx, source.framebuffer(), texture, size)
            }
            (Some(texture), None) => {
                self.blit_texture_to_framebuffer(ctx,
                                                 texture,
                                                 destination.framebuffer(),
                                                 destination.size(),
                                                 ConvertMode::Copy)
            }
            (None, None) => Err(SurfaceError::Gl(gl::INVALID_OPERATION)),
        }
    }

    /// Downsamples `draw` into `destination`.
    pub fn resolve(&mut self, ctx: &GlContext, draw: &DrawBuffer, destination: &PlatformSurface)
                   -> Result<(), SurfaceError> {
        debug_assert_eq!(draw.size(), destination.size());
        self.blit_framebuffer_to_framebuffer(ctx,
                                             draw.framebuffer(),
                                             destination.framebuffer(),
                                             draw.size(),
                                             destination.size())
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        for (_, program) in self.programs.drain() {
            gl.delete_program(program.id);
            gl.delete_shader(program.fragment_shader);
        }
        if let Some(shader) = self.vertex_shader.take() {
            gl.delete_shader(shader);
        }
        if let Some(buffer) = self.quad_buffer.take() {
            gl.delete_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_only_appears_in_conversion_programs() {
        let copy = fragment_shader_source(TextureTarget::TextureTarget2D, ConvertMode::Copy);
        assert!(!copy.contains("SWIZZLE"));
        assert!(!copy.contains(".bgra"));

        let swap = fragment_shader_source(TextureTarget::TextureTargetRectangle,
                                          ConvertMode::SwapRedBlue);
        assert!(swap.contains("texture2DRect(uSampler, vTextureCoord * uSize).bgra"));
    }
}
