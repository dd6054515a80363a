// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OpenGL-specific implementation of texturing.

use crate::error::SurfaceError;
use crate::gl::{self, GLenum, GLint, GLuint, GlDriver};

use euclid::default::Size2D;
use serde::{Deserialize, Serialize};

/// The texture target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureTarget {
    /// TEXTURE_2D.
    TextureTarget2D,
    /// TEXTURE_RECTANGLE, with the size included.
    TextureTargetRectangle,
}

impl TextureTarget {
    pub fn as_gl_target(self) -> GLenum {
        match self {
            TextureTarget::TextureTarget2D => gl::TEXTURE_2D,
            TextureTarget::TextureTargetRectangle => gl::TEXTURE_RECTANGLE,
        }
    }
}

/// A texture. The GL name is not freed on drop; call `destroy` with the owning driver.
#[derive(Debug)]
pub struct Texture {
    /// The OpenGL texture ID.
    id: GLuint,

    /// The texture target.
    pub target: TextureTarget,

    // The size of this texture in device pixels.
    pub size: Size2D<i32>,
}

/// Encapsulates a bound texture. This ensures that the texture is unbound
/// properly.
pub struct BoundTexture<'a> {
    gl: &'a dyn GlDriver,
    pub target: TextureTarget,
}

impl<'a> Drop for BoundTexture<'a> {
    fn drop(&mut self) {
        self.gl.bind_texture(self.target.as_gl_target(), 0);
    }
}

impl Texture {
    /// Creates a texture object without storage.
    pub fn new(gl: &dyn GlDriver, target: TextureTarget, size: Size2D<i32>) -> Texture {
        let this = Texture {
            id: gl.gen_texture(),
            target,
            size,
        };
        this.set_default_params(gl);
        this
    }

    /// Creates an RGBA texture with uninitialized storage of `size`.
    pub fn with_storage(gl: &dyn GlDriver,
                        target: TextureTarget,
                        size: Size2D<i32>,
                        has_alpha: bool)
                        -> Result<Texture, SurfaceError> {
        let texture = Texture::new(gl, target, size);
        let format = if has_alpha { gl::RGBA } else { gl::RGB };
        {
            let _bound = texture.bind(gl);
            gl.tex_image_2d(target.as_gl_target(),
                            format as GLint,
                            size.width,
                            size.height,
                            format,
                            gl::UNSIGNED_BYTE,
                            None);
        }
        match gl.get_error() {
            gl::NO_ERROR => Ok(texture),
            error => {
                texture.destroy(gl);
                if error == gl::OUT_OF_MEMORY {
                    Err(SurfaceError::OutOfMemory)
                } else {
                    Err(SurfaceError::AllocationFailed { width: size.width, height: size.height })
                }
            }
        }
    }

    /// Wraps a texture name owned by someone else, for example one imported from a share
    /// group.
    pub fn wrap(id: GLuint, target: TextureTarget, size: Size2D<i32>) -> Texture {
        Texture {
            id,
            target,
            size,
        }
    }

    /// Returns the raw OpenGL texture underlying this texture.
    pub fn native_texture(&self) -> GLuint {
        self.id
    }

    /// Sets default parameters for this texture.
    fn set_default_params(&self, gl: &dyn GlDriver) {
        let _bound_texture = self.bind(gl);
        let target = self.target.as_gl_target();
        gl.tex_parameter_i(target, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
        gl.tex_parameter_i(target, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
        gl.tex_parameter_i(target, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
        gl.tex_parameter_i(target, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
    }

    /// Binds the texture to the current context.
    pub fn bind<'a>(&self, gl: &'a dyn GlDriver) -> BoundTexture<'a> {
        gl.bind_texture(self.target.as_gl_target(), self.id);

        BoundTexture {
            gl,
            target: self.target,
        }
    }

    pub fn destroy(&self, gl: &dyn GlDriver) {
        if self.id != 0 {
            gl.delete_texture(self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftGl;

    #[test]
    fn failed_storage_frees_the_texture_name() {
        let gl = SoftGl::new();
        gl.set_memory_budget(Some(64));
        let live = gl.live_object_count();
        let result = Texture::with_storage(&gl,
                                           TextureTarget::TextureTarget2D,
                                           Size2D::new(16, 16),
                                           true);
        assert!(matches!(result, Err(SurfaceError::OutOfMemory)));
        assert_eq!(gl.live_object_count(), live);

        let texture = Texture::with_storage(&gl,
                                            TextureTarget::TextureTarget2D,
                                            Size2D::new(4, 4),
                                            true).unwrap();
        assert_eq!(gl.memory_used(), 64);
        texture.destroy(&gl);
        assert_eq!(gl.live_object_count(), live);
    }

    #[test]
    fn wrapped_textures_bind_their_target() {
        let gl = SoftGl::new();
        let owned = Texture::new(&gl, TextureTarget::TextureTarget2D, Size2D::new(2, 2));
        let wrapped = Texture::wrap(owned.native_texture(),
                                    TextureTarget::TextureTarget2D,
                                    Size2D::new(2, 2));
        {
            let _bound = wrapped.bind(&gl);
            assert_eq!(gl.get_integer(gl::TEXTURE_BINDING_2D) as GLuint, owned.native_texture());
        }
        assert_eq!(gl.get_integer(gl::TEXTURE_BINDING_2D), 0);
        owned.destroy(&gl);
    }
}
