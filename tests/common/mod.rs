// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![allow(dead_code)]

use euclid::default::Size2D;
use std::cell::Cell;
use std::rc::Rc;
use webgl_surface::context::{ContextObserver, ContextRegistry, GlContext};
use webgl_surface::framebuffer::ScopedBindFramebuffer;
use webgl_surface::gl::{self, GLuint, GlDriver, GlFeatures};
use webgl_surface::soft::{SoftGl, SoftLimits};

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const GREEN: [u8; 4] = [0, 255, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
pub const CLEAR: [u8; 4] = [0, 0, 0, 0];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A software context plus the registry it lives in.
pub struct TestContext {
    pub registry: ContextRegistry,
    pub soft: Rc<SoftGl>,
    pub ctx: Rc<GlContext>,
}

impl TestContext {
    pub fn new() -> TestContext {
        TestContext::with(GlFeatures::all(), SoftLimits::default())
    }

    pub fn with(features: GlFeatures, limits: SoftLimits) -> TestContext {
        init_logging();
        let registry = ContextRegistry::new();
        let soft = Rc::new(SoftGl::with_features(features, limits));
        let ctx = GlContext::new(&registry, soft.clone());
        TestContext { registry, soft, ctx }
    }

    pub fn with_max_size(max: i32) -> TestContext {
        TestContext::with(GlFeatures::all(),
                          SoftLimits {
                              max_renderbuffer_size: max,
                              max_texture_size: max,
                              ..SoftLimits::default()
                          })
    }

    /// Another context in the same share group and registry, as a compositor would have.
    pub fn shared(&self) -> TestContext {
        let soft = Rc::new(self.soft.new_shared());
        let ctx = GlContext::new(&self.registry, soft.clone());
        TestContext { registry: self.registry.clone(), soft, ctx }
    }

    /// An unrelated context in its own share group.
    pub fn unrelated(&self) -> TestContext {
        let soft = Rc::new(SoftGl::new());
        let ctx = GlContext::new(&self.registry, soft.clone());
        TestContext { registry: self.registry.clone(), soft, ctx }
    }

    pub fn gl(&self) -> &dyn GlDriver {
        self.ctx.gl()
    }

    /// Clears whatever is bound for drawing.
    pub fn clear(&self, color: [u8; 4]) {
        let gl = self.gl();
        gl.clear_color(color[0] as f32 / 255.0,
                       color[1] as f32 / 255.0,
                       color[2] as f32 / 255.0,
                       color[3] as f32 / 255.0);
        gl.clear(gl::COLOR_BUFFER_BIT);
    }

    /// Clears `framebuffer` without disturbing the current bindings.
    pub fn clear_framebuffer(&self, framebuffer: GLuint, color: [u8; 4]) {
        let _bind = ScopedBindFramebuffer::bind(self.gl(), framebuffer);
        self.clear(color);
    }

    /// RGBA rows of `framebuffer`, bottom row first.
    pub fn read_framebuffer(&self, framebuffer: GLuint, size: Size2D<i32>) -> Vec<u8> {
        let gl = self.gl();
        let mut pixels = vec![0; size.width as usize * size.height as usize * 4];
        let _bind = ScopedBindFramebuffer::bind(gl, framebuffer);
        gl.read_pixels(0, 0, size.width, size.height, gl::RGBA, gl::UNSIGNED_BYTE, &mut pixels);
        pixels
    }
}

pub fn pixel(pixels: &[u8], width: i32, x: i32, y: i32) -> [u8; 4] {
    let offset = (y as usize * width as usize + x as usize) * 4;
    [pixels[offset], pixels[offset + 1], pixels[offset + 2], pixels[offset + 3]]
}

pub fn all_pixels_are(pixels: &[u8], color: [u8; 4]) -> bool {
    pixels.chunks(4).all(|pixel| pixel == color)
}

/// Counts context-loss notifications.
#[derive(Default)]
pub struct RecordingObserver {
    losses: Cell<usize>,
}

impl RecordingObserver {
    pub fn new() -> Rc<RecordingObserver> {
        Rc::new(RecordingObserver::default())
    }

    pub fn losses(&self) -> usize {
        self.losses.get()
    }
}

impl ContextObserver for RecordingObserver {
    fn notify_context_lost(&self) {
        self.losses.set(self.losses.get() + 1);
    }
}
