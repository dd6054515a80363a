// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod common;

use common::{all_pixels_are, pixel, TestContext, BLUE, GREEN, RED};
use euclid::default::Size2D;
use webgl_surface::blit::ConvertMode;
use webgl_surface::framebuffer::{ColorAttachment, PlatformSurface};
use webgl_surface::gl::{self, GLuint, GlFeatures};
use webgl_surface::soft::SoftLimits;
use webgl_surface::texturegl::{Texture, TextureTarget};

fn renderbuffer_surface(test: &TestContext, size: Size2D<i32>) -> PlatformSurface {
    let color = ColorAttachment::renderbuffer(test.gl(), size, true).unwrap();
    PlatformSurface::new(&test.ctx, size, color, None).unwrap()
}

fn texture_surface(test: &TestContext, target: TextureTarget, size: Size2D<i32>)
                   -> PlatformSurface {
    let texture = Texture::with_storage(test.gl(), target, size, true).unwrap();
    PlatformSurface::new(&test.ctx, size, ColorAttachment::Texture(texture), None).unwrap()
}

fn texture_of(surface: &PlatformSurface) -> &Texture {
    surface.color().texture().unwrap()
}

#[test]
fn framebuffer_blits_ignore_scissor_and_keep_bindings() {
    let test = TestContext::new();
    let size = Size2D::new(4, 4);
    let mut source = renderbuffer_surface(&test, size);
    let mut destination = renderbuffer_surface(&test, size);
    test.clear_framebuffer(source.framebuffer(), RED);

    let gl = test.gl();
    let user: GLuint = gl.gen_framebuffer();
    gl.bind_framebuffer(gl::FRAMEBUFFER, user);
    gl.enable(gl::SCISSOR_TEST);
    gl.scissor(0, 0, 1, 1);

    test.ctx.blit_helper()
            .blit_framebuffer_to_framebuffer(&test.ctx,
                                             source.framebuffer(),
                                             destination.framebuffer(),
                                             size,
                                             size)
            .unwrap();

    assert!(gl.is_enabled(gl::SCISSOR_TEST));
    assert_eq!(test.ctx.get_integer(gl::DRAW_FRAMEBUFFER_BINDING) as GLuint, user);
    assert_eq!(test.ctx.get_integer(gl::READ_FRAMEBUFFER_BINDING) as GLuint, user);
    gl.disable(gl::SCISSOR_TEST);
    gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
    gl.delete_framebuffer(user);

    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, RED));
    source.destroy(gl);
    destination.destroy(gl);
}

#[test]
fn framebuffer_blits_need_driver_support() {
    let test = TestContext::with(GlFeatures::minimal(), SoftLimits::default());
    let size = Size2D::new(2, 2);
    let result = test.ctx.blit_helper().blit_framebuffer_to_framebuffer(&test.ctx, 1, 2, size, size);
    assert!(result.is_err());
}

#[test]
fn plain_texture_copies_use_the_blitter() {
    let test = TestContext::new();
    let size = Size2D::new(4, 4);
    let mut source = texture_surface(&test, TextureTarget::TextureTarget2D, size);
    let mut destination = renderbuffer_surface(&test, size);
    test.clear_framebuffer(source.framebuffer(), GREEN);

    let draws = test.soft.draw_count();
    test.ctx.blit_helper()
            .blit_texture_to_framebuffer(&test.ctx,
                                         texture_of(&source),
                                         destination.framebuffer(),
                                         size,
                                         ConvertMode::Copy)
            .unwrap();
    assert_eq!(test.soft.draw_count(), draws);
    assert_eq!(test.ctx.blit_helper().program_count(), 0);

    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, GREEN));
    source.destroy(test.gl());
    destination.destroy(test.gl());
}

#[test]
fn red_blue_swaps_draw_a_quad_and_restore_state() {
    let test = TestContext::new();
    let size = Size2D::new(4, 4);
    let mut source = texture_surface(&test, TextureTarget::TextureTarget2D, size);
    let mut destination = renderbuffer_surface(&test, size);
    test.clear_framebuffer(source.framebuffer(), RED);

    let gl = test.gl();
    gl.viewport(0, 0, 1, 1);
    let draws = test.soft.draw_count();
    test.ctx.blit_helper()
            .blit_texture_to_framebuffer(&test.ctx,
                                         texture_of(&source),
                                         destination.framebuffer(),
                                         size,
                                         ConvertMode::SwapRedBlue)
            .unwrap();

    assert_eq!(test.soft.draw_count(), draws + 1);
    let mut viewport = [0; 4];
    gl.get_integer_v(gl::VIEWPORT, &mut viewport);
    assert_eq!(viewport, [0, 0, 1, 1]);
    assert_eq!(test.ctx.get_integer(gl::CURRENT_PROGRAM), 0);
    assert_eq!(test.ctx.get_integer(gl::TEXTURE_BINDING_2D), 0);

    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, BLUE));
    source.destroy(gl);
    destination.destroy(gl);
}

#[test]
fn programs_are_cached_per_target_and_mode() {
    let test = TestContext::new();
    let size = Size2D::new(2, 2);
    let mut plain = texture_surface(&test, TextureTarget::TextureTarget2D, size);
    let mut rectangle = texture_surface(&test, TextureTarget::TextureTargetRectangle, size);
    let mut destination = renderbuffer_surface(&test, size);
    test.clear_framebuffer(rectangle.framebuffer(), GREEN);

    let mut helper = test.ctx.blit_helper();
    for _ in 0..2 {
        helper.blit_texture_to_framebuffer(&test.ctx,
                                           texture_of(&plain),
                                           destination.framebuffer(),
                                           size,
                                           ConvertMode::SwapRedBlue)
              .unwrap();
    }
    assert_eq!(helper.program_count(), 1);

    helper.blit_texture_to_framebuffer(&test.ctx,
                                       texture_of(&rectangle),
                                       destination.framebuffer(),
                                       size,
                                       ConvertMode::Copy)
          .unwrap();
    assert_eq!(helper.program_count(), 2);
    drop(helper);

    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, GREEN));
    plain.destroy(test.gl());
    rectangle.destroy(test.gl());
    destination.destroy(test.gl());
}

#[test]
fn surface_copies_fall_back_to_copy_tex_image() {
    let test = TestContext::with(GlFeatures::minimal(), SoftLimits::default());
    let size = Size2D::new(4, 2);
    let mut source = texture_surface(&test, TextureTarget::TextureTarget2D, size);
    let mut destination = texture_surface(&test, TextureTarget::TextureTarget2D, size);
    test.clear_framebuffer(source.framebuffer(), RED);

    test.ctx.blit_helper().copy_surface(&test.ctx, &source, &destination).unwrap();
    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, RED));
    source.destroy(test.gl());
    destination.destroy(test.gl());
}

#[test]
fn stretching_blits_scale() {
    let test = TestContext::new();
    let mut source = renderbuffer_surface(&test, Size2D::new(2, 2));
    let mut destination = renderbuffer_surface(&test, Size2D::new(4, 4));
    test.clear_framebuffer(source.framebuffer(), BLUE);

    test.ctx.blit_helper()
            .copy_surface(&test.ctx, &source, &destination)
            .unwrap();
    let pixels = test.read_framebuffer(destination.framebuffer(), Size2D::new(4, 4));
    assert_eq!(pixel(&pixels, 4, 3, 3), BLUE);
    source.destroy(test.gl());
    destination.destroy(test.gl());
}
