// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A CPU implementation of `GlDriver`.
//!
//! `SoftGl` keeps every image as tightly packed RGBA8 rows, bottom row first, just like
//! `glReadPixels` returns them. Textures, renderbuffers, programs and fences live in a share
//! group and are visible to every context created with `new_shared`; framebuffers and all
//! binding state are per context.
//!
//! Multisampled renderbuffers store a single sample per pixel, but reading from them with
//! `read_pixels` or `copy_tex_*` raises `INVALID_OPERATION` exactly as a real driver does, so
//! forgetting to resolve is caught. The only primitive `draw_arrays` rasterizes is a textured
//! quad covering the viewport, which is all the blit helper issues.

use crate::gl::{self, GLbitfield, GLenum, GLfloat, GLint, GLsizei, GLuint, GlDriver, GlFeatures};
use crate::gl::GlFence;

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SHARE_GROUP: AtomicU64 = AtomicU64::new(1);

/// Implementation limits reported through `get_integer_v`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoftLimits {
    pub max_renderbuffer_size: i32,
    pub max_texture_size: i32,
    pub max_samples: i32,
}

impl Default for SoftLimits {
    fn default() -> SoftLimits {
        SoftLimits {
            max_renderbuffer_size: 4096,
            max_texture_size: 4096,
            max_samples: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageFormat {
    Rgba,
    Rgb,
    Depth,
    Stencil,
    DepthStencil,
}

impl ImageFormat {
    fn from_internal_format(format: GLenum) -> Option<ImageFormat> {
        match format {
            gl::RGBA | gl::RGBA8 | gl::BGRA => Some(ImageFormat::Rgba),
            gl::RGB | gl::RGB8 => Some(ImageFormat::Rgb),
            gl::DEPTH_COMPONENT16 | gl::DEPTH_COMPONENT24 => Some(ImageFormat::Depth),
            gl::STENCIL_INDEX8 => Some(ImageFormat::Stencil),
            gl::DEPTH24_STENCIL8 | gl::DEPTH_STENCIL => Some(ImageFormat::DepthStencil),
            _ => None,
        }
    }

    fn is_color(self) -> bool {
        matches!(self, ImageFormat::Rgba | ImageFormat::Rgb)
    }

    fn has_depth(self) -> bool {
        matches!(self, ImageFormat::Depth | ImageFormat::DepthStencil)
    }

    fn has_stencil(self) -> bool {
        matches!(self, ImageFormat::Stencil | ImageFormat::DepthStencil)
    }
}

#[derive(Clone, Debug)]
struct Image {
    width: i32,
    height: i32,
    samples: i32,
    format: ImageFormat,
    data: Vec<u8>,
}

impl Image {
    fn new(width: i32, height: i32, samples: i32, format: ImageFormat) -> Image {
        let data = if format.is_color() {
            let mut data = vec![0; width as usize * height as usize * 4];
            if format == ImageFormat::Rgb {
                for pixel in data.chunks_mut(4) {
                    pixel[3] = 255;
                }
            }
            data
        } else {
            Vec::new()
        };
        Image { width, height, samples, format, data }
    }

    /// Bytes charged against the memory budget.
    fn cost(width: i32, height: i32, samples: i32) -> usize {
        width as usize * height as usize * 4 * samples.max(1) as usize
    }

    fn footprint(&self) -> usize {
        Image::cost(self.width, self.height, self.samples)
    }

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn offset(&self, x: i32, y: i32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn pixel(&self, x: i32, y: i32) -> [u8; 4] {
        let offset = self.offset(x, y);
        [self.data[offset], self.data[offset + 1], self.data[offset + 2], self.data[offset + 3]]
    }

    fn put_pixel(&mut self, x: i32, y: i32, mut pixel: [u8; 4]) {
        if self.format == ImageFormat::Rgb {
            pixel[3] = 255;
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + 4].copy_from_slice(&pixel);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ImageRef {
    Renderbuffer(GLuint),
    Texture(GLuint),
}

struct TextureObject {
    target: Option<GLenum>,
    image: Option<Image>,
}

struct ShaderObject {
    shader_type: GLenum,
    source: String,
    compiled: bool,
}

#[derive(Default)]
struct ProgramObject {
    shaders: Vec<GLuint>,
    linked: bool,
    fragment_source: String,
    attributes: HashMap<String, GLint>,
    uniforms: HashMap<String, GLint>,
}

/// Objects shared by every context in a share group.
#[derive(Default)]
struct Objects {
    next_name: GLuint,
    textures: HashMap<GLuint, TextureObject>,
    renderbuffers: HashMap<GLuint, Option<Image>>,
    shaders: HashMap<GLuint, ShaderObject>,
    programs: HashMap<GLuint, ProgramObject>,
    buffers: HashMap<GLuint, Vec<f32>>,
    fences: HashSet<usize>,
    next_fence: usize,
    memory_used: usize,
    memory_budget: Option<usize>,
    fail_fences: bool,
    stall_fences: bool,
    allocations: usize,
}

impl Objects {
    fn gen_name(&mut self) -> GLuint {
        self.next_name += 1;
        self.next_name
    }

    fn image(&self, image: ImageRef) -> Option<&Image> {
        match image {
            ImageRef::Renderbuffer(name) => self.renderbuffers.get(&name)?.as_ref(),
            ImageRef::Texture(name) => self.textures.get(&name)?.image.as_ref(),
        }
    }

    fn image_mut(&mut self, image: ImageRef) -> Option<&mut Image> {
        match image {
            ImageRef::Renderbuffer(name) => self.renderbuffers.get_mut(&name)?.as_mut(),
            ImageRef::Texture(name) => self.textures.get_mut(&name)?.image.as_mut(),
        }
    }

    /// Charges `new_cost` bytes against the budget after crediting `old_cost`.
    fn charge(&mut self, old_cost: usize, new_cost: usize) -> Result<(), GLenum> {
        let used = self.memory_used - old_cost;
        if let Some(budget) = self.memory_budget {
            if used + new_cost > budget {
                return Err(gl::OUT_OF_MEMORY);
            }
        }
        self.memory_used = used + new_cost;
        self.allocations += 1;
        Ok(())
    }

    fn release(&mut self, image: Option<&Image>) {
        if let Some(image) = image {
            self.memory_used -= image.footprint();
        }
    }
}

#[derive(Clone, Copy, Default)]
struct FramebufferObject {
    color: Option<ImageRef>,
    depth: Option<ImageRef>,
    stencil: Option<ImageRef>,
}

#[derive(Default)]
struct Counters {
    finishes: Cell<usize>,
    flushes: Cell<usize>,
    blits: Cell<usize>,
    draws: Cell<usize>,
}

/// Per-context state.
struct ContextState {
    framebuffers: HashMap<GLuint, FramebufferObject>,
    draw_framebuffer: GLuint,
    read_framebuffer: GLuint,
    renderbuffer: GLuint,
    active_unit: GLuint,
    texture_bindings: HashMap<(GLuint, GLenum), GLuint>,
    program: GLuint,
    array_buffer: GLuint,
    sampler_units: HashMap<(GLuint, GLint), GLint>,
    enabled: HashSet<GLenum>,
    scissor: [i32; 4],
    viewport: [i32; 4],
    clear_color: [f32; 4],
}

impl ContextState {
    fn new() -> ContextState {
        ContextState {
            framebuffers: HashMap::new(),
            draw_framebuffer: 0,
            read_framebuffer: 0,
            renderbuffer: 0,
            active_unit: 0,
            texture_bindings: HashMap::new(),
            program: 0,
            array_buffer: 0,
            sampler_units: HashMap::new(),
            enabled: HashSet::new(),
            scissor: [0, 0, 0, 0],
            viewport: [0, 0, 0, 0],
            clear_color: [0.0; 4],
        }
    }

    fn bound_texture(&self, target: GLenum) -> GLuint {
        self.texture_bindings.get(&(self.active_unit, target)).cloned().unwrap_or(0)
    }

    fn framebuffer_for_target(&self, target: GLenum) -> Option<GLuint> {
        match target {
            gl::FRAMEBUFFER | gl::DRAW_FRAMEBUFFER => Some(self.draw_framebuffer),
            gl::READ_FRAMEBUFFER => Some(self.read_framebuffer),
            _ => None,
        }
    }

    /// The scissor box if the scissor test is enabled.
    fn clip(&self) -> Option<[i32; 4]> {
        if self.enabled.contains(&gl::SCISSOR_TEST) {
            Some(self.scissor)
        } else {
            None
        }
    }
}

fn inside_clip(clip: Option<[i32; 4]>, x: i32, y: i32) -> bool {
    match clip {
        Some([cx, cy, cw, ch]) => x >= cx && y >= cy && x < cx + cw && y < cy + ch,
        None => true,
    }
}

fn to_unorm(value: GLfloat) -> u8 {
    (value.max(0.0).min(1.0) * 255.0).round() as u8
}

/// A software OpenGL context.
pub struct SoftGl {
    objects: Rc<RefCell<Objects>>,
    state: RefCell<ContextState>,
    share_group: u64,
    features: GlFeatures,
    limits: SoftLimits,
    error: Cell<GLenum>,
    counters: Counters,
}

impl Default for SoftGl {
    fn default() -> SoftGl {
        SoftGl::new()
    }
}

impl SoftGl {
    /// A context with every optional feature in a fresh share group.
    pub fn new() -> SoftGl {
        SoftGl::with_features(GlFeatures::all(), SoftLimits::default())
    }

    pub fn with_features(features: GlFeatures, limits: SoftLimits) -> SoftGl {
        SoftGl {
            objects: Rc::new(RefCell::new(Objects::default())),
            state: RefCell::new(ContextState::new()),
            share_group: NEXT_SHARE_GROUP.fetch_add(1, Ordering::Relaxed),
            features,
            limits,
            error: Cell::new(gl::NO_ERROR),
            counters: Counters::default(),
        }
    }

    /// Creates another context in this context's share group.
    pub fn new_shared(&self) -> SoftGl {
        SoftGl {
            objects: self.objects.clone(),
            state: RefCell::new(ContextState::new()),
            share_group: self.share_group,
            features: self.features,
            limits: self.limits,
            error: Cell::new(gl::NO_ERROR),
            counters: Counters::default(),
        }
    }

    /// Allocations that would push the share group past `budget` bytes fail with
    /// `OUT_OF_MEMORY`.
    pub fn set_memory_budget(&self, budget: Option<usize>) {
        self.objects.borrow_mut().memory_budget = budget;
    }

    pub fn memory_used(&self) -> usize {
        self.objects.borrow().memory_used
    }

    /// Makes `fence_sync` return `None`, as drivers do when they run out of sync objects.
    pub fn set_fail_fences(&self, fail: bool) {
        self.objects.borrow_mut().fail_fences = fail;
    }

    /// Makes `client_wait_sync` time out on every live fence, as if the GPU had hung.
    pub fn set_stall_fences(&self, stall: bool) {
        self.objects.borrow_mut().stall_fences = stall;
    }

    pub fn finish_count(&self) -> usize {
        self.counters.finishes.get()
    }

    pub fn flush_count(&self) -> usize {
        self.counters.flushes.get()
    }

    pub fn blit_count(&self) -> usize {
        self.counters.blits.get()
    }

    pub fn draw_count(&self) -> usize {
        self.counters.draws.get()
    }

    /// Successful texture and renderbuffer storage allocations in the share group.
    pub fn allocation_count(&self) -> usize {
        self.objects.borrow().allocations
    }

    /// Textures and renderbuffers alive in the share group plus this context's framebuffers.
    pub fn live_object_count(&self) -> usize {
        let objects = self.objects.borrow();
        objects.textures.len() + objects.renderbuffers.len() + self.state.borrow().framebuffers.len()
    }

    fn set_error(&self, error: GLenum) {
        if self.error.get() == gl::NO_ERROR {
            self.error.set(error);
        }
    }

    /// Returns the color image of a complete framebuffer or the error using it would raise.
    fn color_target(&self, framebuffer: GLuint) -> Result<ImageRef, GLenum> {
        if framebuffer == 0 {
            return Err(gl::INVALID_FRAMEBUFFER_OPERATION);
        }
        let state = self.state.borrow();
        let attachments = match state.framebuffers.get(&framebuffer) {
            Some(attachments) => *attachments,
            None => return Err(gl::INVALID_FRAMEBUFFER_OPERATION),
        };
        if self.status(&attachments) != gl::FRAMEBUFFER_COMPLETE {
            return Err(gl::INVALID_FRAMEBUFFER_OPERATION);
        }
        attachments.color.ok_or(gl::INVALID_FRAMEBUFFER_OPERATION)
    }

    fn status(&self, attachments: &FramebufferObject) -> GLenum {
        let objects = self.objects.borrow();
        let color = match attachments.color {
            Some(color) => color,
            None => return gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
        };
        let color = match objects.image(color) {
            Some(image) if image.format.is_color() => image,
            _ => return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
        };

        let others = [(attachments.depth, true), (attachments.stencil, false)];
        for &(attachment, depth) in others.iter() {
            let attachment = match attachment {
                Some(attachment) => attachment,
                None => continue,
            };
            let image = match objects.image(attachment) {
                Some(image) => image,
                None => return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
            };
            let right_kind = if depth { image.format.has_depth() } else { image.format.has_stencil() };
            if !right_kind || image.width != color.width || image.height != color.height {
                return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            }
            if image.samples != color.samples {
                return gl::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE;
            }
        }
        gl::FRAMEBUFFER_COMPLETE
    }

    fn attach(&self, target: GLenum, attachment: GLenum, image: Option<ImageRef>) {
        let mut state = self.state.borrow_mut();
        let framebuffer = match state.framebuffer_for_target(target) {
            Some(framebuffer) => framebuffer,
            None => {
                return self.set_error(gl::INVALID_ENUM);
            }
        };
        let attachments = match state.framebuffers.get_mut(&framebuffer) {
            Some(attachments) if framebuffer != 0 => attachments,
            _ => {
                return self.set_error(gl::INVALID_OPERATION);
            }
        };
        match attachment {
            gl::COLOR_ATTACHMENT0 => attachments.color = image,
            gl::DEPTH_ATTACHMENT => attachments.depth = image,
            gl::STENCIL_ATTACHMENT => attachments.stencil = image,
            gl::DEPTH_STENCIL_ATTACHMENT => {
                attachments.depth = image;
                attachments.stencil = image;
            }
            _ => {
                self.set_error(gl::INVALID_ENUM)
            }
        }
    }

    /// Copies a `width` x `height` block of the read framebuffer starting at (`x`, `y`).
    /// Pixels outside the source come back transparent black.
    fn read_block(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei)
                  -> Result<Vec<u8>, GLenum> {
        let read_framebuffer = self.state.borrow().read_framebuffer;
        let source = self.color_target(read_framebuffer)?;
        let objects = self.objects.borrow();
        let image = objects.image(source).ok_or(gl::INVALID_FRAMEBUFFER_OPERATION)?;
        if image.samples > 0 {
            return Err(gl::INVALID_OPERATION);
        }
        let mut block = vec![0; width.max(0) as usize * height.max(0) as usize * 4];
        for row in 0..height {
            for column in 0..width {
                let (source_x, source_y) = (x + column, y + row);
                if !image.contains(source_x, source_y) {
                    continue;
                }
                let offset = (row as usize * width as usize + column as usize) * 4;
                block[offset..offset + 4].copy_from_slice(&image.pixel(source_x, source_y));
            }
        }
        Ok(block)
    }

    fn allocate_texture(&self, target: GLenum, width: GLsizei, height: GLsizei, format: ImageFormat)
                        -> Result<GLuint, GLenum> {
        if width < 0 || height < 0 || width > self.limits.max_texture_size ||
                height > self.limits.max_texture_size {
            return Err(gl::INVALID_VALUE);
        }
        let name = self.state.borrow().bound_texture(target);
        let mut objects = self.objects.borrow_mut();
        let old_cost = match objects.textures.get(&name) {
            Some(texture) => texture.image.as_ref().map_or(0, Image::footprint),
            None => return Err(gl::INVALID_OPERATION),
        };
        objects.charge(old_cost, Image::cost(width, height, 0))?;
        if let Some(texture) = objects.textures.get_mut(&name) {
            texture.image = Some(Image::new(width, height, 0, format));
        }
        Ok(name)
    }

    fn copy_into_texture(&self, name: GLuint, x_offset: GLint, y_offset: GLint, width: GLsizei,
                         height: GLsizei, block: &[u8]) {
        let mut objects = self.objects.borrow_mut();
        let image = match objects.textures.get_mut(&name).and_then(|texture| texture.image.as_mut()) {
            Some(image) => image,
            None => return,
        };
        for row in 0..height {
            for column in 0..width {
                let offset = (row as usize * width as usize + column as usize) * 4;
                let pixel = [block[offset], block[offset + 1], block[offset + 2], block[offset + 3]];
                image.put_pixel(x_offset + column, y_offset + row, pixel);
            }
        }
    }

    fn program_fragment_source(&self) -> Option<(GLuint, String)> {
        let program = self.state.borrow().program;
        let objects = self.objects.borrow();
        match objects.programs.get(&program) {
            Some(object) if object.linked => Some((program, object.fragment_source.clone())),
            _ => None,
        }
    }
}

impl GlDriver for SoftGl {
    fn features(&self) -> GlFeatures {
        self.features
    }

    fn share_group(&self) -> u64 {
        self.share_group
    }

    fn get_error(&self) -> GLenum {
        self.error.replace(gl::NO_ERROR)
    }

    fn get_integer_v(&self, name: GLenum, result: &mut [GLint]) {
        let state = self.state.borrow();
        let values: Vec<GLint> = match name {
            gl::DRAW_FRAMEBUFFER_BINDING => vec![state.draw_framebuffer as GLint],
            gl::READ_FRAMEBUFFER_BINDING => vec![state.read_framebuffer as GLint],
            gl::RENDERBUFFER_BINDING => vec![state.renderbuffer as GLint],
            gl::TEXTURE_BINDING_2D => vec![state.bound_texture(gl::TEXTURE_2D) as GLint],
            gl::TEXTURE_BINDING_RECTANGLE => {
                vec![state.bound_texture(gl::TEXTURE_RECTANGLE) as GLint]
            }
            gl::ACTIVE_TEXTURE => vec![(gl::TEXTURE0 + state.active_unit) as GLint],
            gl::CURRENT_PROGRAM => vec![state.program as GLint],
            gl::ARRAY_BUFFER_BINDING => vec![state.array_buffer as GLint],
            gl::VIEWPORT => state.viewport.to_vec(),
            gl::SCISSOR_BOX => state.scissor.to_vec(),
            gl::MAX_RENDERBUFFER_SIZE => vec![self.limits.max_renderbuffer_size],
            gl::MAX_TEXTURE_SIZE => vec![self.limits.max_texture_size],
            gl::MAX_SAMPLES => vec![self.limits.max_samples],
            _ => {
                return self.set_error(gl::INVALID_ENUM);
            }
        };
        for (slot, value) in result.iter_mut().zip(values) {
            *slot = value;
        }
    }

    fn is_enabled(&self, cap: GLenum) -> bool {
        self.state.borrow().enabled.contains(&cap)
    }

    fn enable(&self, cap: GLenum) {
        self.state.borrow_mut().enabled.insert(cap);
    }

    fn disable(&self, cap: GLenum) {
        self.state.borrow_mut().enabled.remove(&cap);
    }

    fn scissor(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        if width < 0 || height < 0 {
            return self.set_error(gl::INVALID_VALUE);
        }
        self.state.borrow_mut().scissor = [x, y, width, height];
    }

    fn viewport(&self, x: GLint, y: GLint, width: GLsizei, height: GLsizei) {
        if width < 0 || height < 0 {
            return self.set_error(gl::INVALID_VALUE);
        }
        self.state.borrow_mut().viewport = [x, y, width, height];
    }

    fn clear_color(&self, r: GLfloat, g: GLfloat, b: GLfloat, a: GLfloat) {
        self.state.borrow_mut().clear_color = [r, g, b, a];
    }

    fn clear(&self, mask: GLbitfield) {
        if mask & gl::COLOR_BUFFER_BIT == 0 {
            return;
        }
        let (framebuffer, clip, color) = {
            let state = self.state.borrow();
            (state.draw_framebuffer, state.clip(), state.clear_color)
        };
        if framebuffer == 0 {
            return;
        }
        let target = match self.color_target(framebuffer) {
            Ok(target) => target,
            Err(error) => return self.set_error(error),
        };
        let pixel = [to_unorm(color[0]), to_unorm(color[1]), to_unorm(color[2]), to_unorm(color[3])];
        let mut objects = self.objects.borrow_mut();
        if let Some(image) = objects.image_mut(target) {
            for y in 0..image.height {
                for x in 0..image.width {
                    if inside_clip(clip, x, y) {
                        image.put_pixel(x, y, pixel);
                    }
                }
            }
        }
    }

    fn gen_framebuffer(&self) -> GLuint {
        let name = self.objects.borrow_mut().gen_name();
        self.state.borrow_mut().framebuffers.insert(name, FramebufferObject::default());
        name
    }

    fn delete_framebuffer(&self, framebuffer: GLuint) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.remove(&framebuffer).is_some() {
            if state.draw_framebuffer == framebuffer {
                state.draw_framebuffer = 0;
            }
            if state.read_framebuffer == framebuffer {
                state.read_framebuffer = 0;
            }
        }
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: GLuint) {
        let mut state = self.state.borrow_mut();
        if framebuffer != 0 && !state.framebuffers.contains_key(&framebuffer) {
            return self.set_error(gl::INVALID_OPERATION);
        }
        match target {
            gl::FRAMEBUFFER => {
                state.draw_framebuffer = framebuffer;
                state.read_framebuffer = framebuffer;
            }
            gl::DRAW_FRAMEBUFFER if self.features.framebuffer_blit => {
                state.draw_framebuffer = framebuffer
            }
            gl::READ_FRAMEBUFFER if self.features.framebuffer_blit => {
                state.read_framebuffer = framebuffer
            }
            _ => {
                self.set_error(gl::INVALID_ENUM)
            }
        }
    }

    fn framebuffer_renderbuffer(&self, target: GLenum, attachment: GLenum, renderbuffer: GLuint) {
        if renderbuffer != 0 && !self.objects.borrow().renderbuffers.contains_key(&renderbuffer) {
            return self.set_error(gl::INVALID_OPERATION);
        }
        let image = if renderbuffer == 0 { None } else { Some(ImageRef::Renderbuffer(renderbuffer)) };
        self.attach(target, attachment, image)
    }

    fn framebuffer_texture_2d(&self,
                              target: GLenum,
                              attachment: GLenum,
                              texture_target: GLenum,
                              texture: GLuint) {
        if texture != 0 {
            let objects = self.objects.borrow();
            match objects.textures.get(&texture) {
                Some(object) if object.target == Some(texture_target) => {}
                _ => {
                    return self.set_error(gl::INVALID_OPERATION);
                }
            }
        }
        let image = if texture == 0 { None } else { Some(ImageRef::Texture(texture)) };
        self.attach(target, attachment, image)
    }

    fn check_framebuffer_status(&self, target: GLenum) -> GLenum {
        let state = self.state.borrow();
        let framebuffer = match state.framebuffer_for_target(target) {
            Some(framebuffer) => framebuffer,
            None => {
                self.set_error(gl::INVALID_ENUM);
                return 0;
            }
        };
        if framebuffer == 0 {
            return gl::FRAMEBUFFER_COMPLETE;
        }
        match state.framebuffers.get(&framebuffer) {
            Some(attachments) => self.status(attachments),
            None => gl::FRAMEBUFFER_UNSUPPORTED,
        }
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
                        _filter: GLenum) {
        if !self.features.framebuffer_blit {
            return self.set_error(gl::INVALID_OPERATION);
        }
        self.counters.blits.set(self.counters.blits.get() + 1);
        if mask & gl::COLOR_BUFFER_BIT == 0 {
            return;
        }

        let (read_framebuffer, draw_framebuffer, clip) = {
            let state = self.state.borrow();
            (state.read_framebuffer, state.draw_framebuffer, state.clip())
        };
        let (source, destination) = match (self.color_target(read_framebuffer),
                                           self.color_target(draw_framebuffer)) {
            (Ok(source), Ok(destination)) => (source, destination),
            (Err(error), _) | (_, Err(error)) => return self.set_error(error),
        };

        let mut objects = self.objects.borrow_mut();
        let source = match objects.image(source) {
            Some(image) => image.clone(),
            None => return,
        };
        let destination = match objects.image_mut(destination) {
            Some(image) => image,
            None => return,
        };
        let same_extent = (src_x1 - src_x0).abs() == (dst_x1 - dst_x0).abs() &&
            (src_y1 - src_y0).abs() == (dst_y1 - dst_y0).abs();
        if destination.samples > 0 || (source.samples > 0 && !same_extent) {
            return self.set_error(gl::INVALID_OPERATION);
        }
        if dst_x0 == dst_x1 || dst_y0 == dst_y1 {
            return;
        }

        let (dst_width, dst_height) = ((dst_x1 - dst_x0) as f32, (dst_y1 - dst_y0) as f32);
        let (src_width, src_height) = ((src_x1 - src_x0) as f32, (src_y1 - src_y0) as f32);
        for y in dst_y0.min(dst_y1)..dst_y0.max(dst_y1) {
            let v = (y as f32 + 0.5 - dst_y0 as f32) / dst_height;
            let source_y = (src_y0 as f32 + v * src_height).floor() as i32;
            for x in dst_x0.min(dst_x1)..dst_x0.max(dst_x1) {
                if !destination.contains(x, y) || !inside_clip(clip, x, y) {
                    continue;
                }
                let u = (x as f32 + 0.5 - dst_x0 as f32) / dst_width;
                let source_x = (src_x0 as f32 + u * src_width).floor() as i32;
                if source.contains(source_x, source_y) {
                    destination.put_pixel(x, y, source.pixel(source_x, source_y));
                }
            }
        }
    }

    fn gen_renderbuffer(&self) -> GLuint {
        let mut objects = self.objects.borrow_mut();
        let name = objects.gen_name();
        objects.renderbuffers.insert(name, None);
        name
    }

    fn delete_renderbuffer(&self, renderbuffer: GLuint) {
        let mut objects = self.objects.borrow_mut();
        if let Some(image) = objects.renderbuffers.remove(&renderbuffer) {
            objects.release(image.as_ref());
        }
        let mut state = self.state.borrow_mut();
        if state.renderbuffer == renderbuffer {
            state.renderbuffer = 0;
        }
    }

    fn bind_renderbuffer(&self, renderbuffer: GLuint) {
        if renderbuffer != 0 && !self.objects.borrow().renderbuffers.contains_key(&renderbuffer) {
            return self.set_error(gl::INVALID_OPERATION);
        }
        self.state.borrow_mut().renderbuffer = renderbuffer;
    }

    fn renderbuffer_storage(&self,
                            samples: GLsizei,
                            internal_format: GLenum,
                            width: GLsizei,
                            height: GLsizei) {
        let format = match ImageFormat::from_internal_format(internal_format) {
            Some(format) => format,
            None => return self.set_error(gl::INVALID_ENUM),
        };
        if samples > 0 && !self.features.framebuffer_multisample {
            return self.set_error(gl::INVALID_OPERATION);
        }
        if samples < 0 || samples > self.limits.max_samples || width < 0 || height < 0 ||
                width > self.limits.max_renderbuffer_size ||
                height > self.limits.max_renderbuffer_size {
            return self.set_error(gl::INVALID_VALUE);
        }
        let renderbuffer = self.state.borrow().renderbuffer;
        if renderbuffer == 0 {
            return self.set_error(gl::INVALID_OPERATION);
        }

        let mut objects = self.objects.borrow_mut();
        let old_cost = match objects.renderbuffers.get(&renderbuffer) {
            Some(image) => image.as_ref().map_or(0, Image::footprint),
            None => 0,
        };
        if let Err(error) = objects.charge(old_cost, Image::cost(width, height, samples)) {
            return self.set_error(error);
        }
        objects.renderbuffers.insert(renderbuffer, Some(Image::new(width, height, samples, format)));
    }

    fn gen_texture(&self) -> GLuint {
        let mut objects = self.objects.borrow_mut();
        let name = objects.gen_name();
        objects.textures.insert(name, TextureObject { target: None, image: None });
        name
    }

    fn delete_texture(&self, texture: GLuint) {
        let mut objects = self.objects.borrow_mut();
        if let Some(object) = objects.textures.remove(&texture) {
            objects.release(object.image.as_ref());
        }
        self.state.borrow_mut().texture_bindings.retain(|_, bound| *bound != texture);
    }

    fn active_texture(&self, unit: GLenum) {
        if unit < gl::TEXTURE0 || unit > gl::TEXTURE31 {
            return self.set_error(gl::INVALID_ENUM);
        }
        self.state.borrow_mut().active_unit = unit - gl::TEXTURE0;
    }

    fn bind_texture(&self, target: GLenum, texture: GLuint) {
        match target {
            gl::TEXTURE_2D => {}
            gl::TEXTURE_RECTANGLE if self.features.texture_rectangle => {}
            _ => return self.set_error(gl::INVALID_ENUM),
        }
        if texture != 0 {
            let mut objects = self.objects.borrow_mut();
            match objects.textures.get_mut(&texture) {
                Some(object) => {
                    match object.target {
                        None => object.target = Some(target),
                        Some(existing) if existing == target => {}
                        Some(_) => {
                            return self.set_error(gl::INVALID_OPERATION);
                        }
                    }
                }
                None => {
                    return self.set_error(gl::INVALID_OPERATION);
                }
            }
        }
        let mut state = self.state.borrow_mut();
        let unit = state.active_unit;
        state.texture_bindings.insert((unit, target), texture);
    }

    fn tex_parameter_i(&self, _target: GLenum, _pname: GLenum, _param: GLint) {}

    fn tex_image_2d(&self,
                    target: GLenum,
                    internal_format: GLint,
                    width: GLsizei,
                    height: GLsizei,
                    format: GLenum,
                    ty: GLenum,
                    data: Option<&[u8]>) {
        let image_format = match ImageFormat::from_internal_format(internal_format as GLenum) {
            Some(image_format) if image_format.is_color() => image_format,
            _ => return self.set_error(gl::INVALID_ENUM),
        };
        if ty != gl::UNSIGNED_BYTE {
            return self.set_error(gl::INVALID_ENUM);
        }
        let name = match self.allocate_texture(target, width, height, image_format) {
            Ok(name) => name,
            Err(error) => return self.set_error(error),
        };
        let data = match data {
            Some(data) => data,
            None => return,
        };

        let components = if format == gl::RGB { 3 } else { 4 };
        let mut block = vec![255; width as usize * height as usize * 4];
        for (pixel, source) in block.chunks_mut(4).zip(data.chunks(components)) {
            pixel[..source.len()].copy_from_slice(source);
            if format == gl::BGRA {
                pixel.swap(0, 2);
            }
        }
        self.copy_into_texture(name, 0, 0, width, height, &block);
    }

    fn copy_tex_image_2d(&self,
                         target: GLenum,
                         _level: GLint,
                         internal_format: GLenum,
                         x: GLint,
                         y: GLint,
                         width: GLsizei,
                         height: GLsizei) {
        let image_format = match ImageFormat::from_internal_format(internal_format) {
            Some(image_format) if image_format.is_color() => image_format,
            _ => return self.set_error(gl::INVALID_ENUM),
        };
        let block = match self.read_block(x, y, width, height) {
            Ok(block) => block,
            Err(error) => return self.set_error(error),
        };
        match self.allocate_texture(target, width, height, image_format) {
            Ok(name) => self.copy_into_texture(name, 0, 0, width, height, &block),
            Err(error) => self.set_error(error),
        }
    }

    fn copy_tex_sub_image_2d(&self,
                             target: GLenum,
                             _level: GLint,
                             x_offset: GLint,
                             y_offset: GLint,
                             x: GLint,
                             y: GLint,
                             width: GLsizei,
                             height: GLsizei) {
        let name = self.state.borrow().bound_texture(target);
        let fits = {
            let objects = self.objects.borrow();
            match objects.textures.get(&name).and_then(|texture| texture.image.as_ref()) {
                Some(image) => {
                    x_offset >= 0 && y_offset >= 0 && width >= 0 && height >= 0 &&
                        x_offset + width <= image.width && y_offset + height <= image.height
                }
                None => {
                    return self.set_error(gl::INVALID_OPERATION);
                }
            }
        };
        if !fits {
            return self.set_error(gl::INVALID_VALUE);
        }
        match self.read_block(x, y, width, height) {
            Ok(block) => self.copy_into_texture(name, x_offset, y_offset, width, height, &block),
            Err(error) => self.set_error(error),
        }
    }

    fn read_pixels(&self,
                   x: GLint,
                   y: GLint,
                   width: GLsizei,
                   height: GLsizei,
                   format: GLenum,
                   ty: GLenum,
                   dst: &mut [u8]) {
        let components = match format {
            gl::RGBA | gl::BGRA => 4,
            gl::RGB => 3,
            _ => return self.set_error(gl::INVALID_ENUM),
        };
        if ty != gl::UNSIGNED_BYTE {
            return self.set_error(gl::INVALID_ENUM);
        }
        if width < 0 || height < 0 {
            return self.set_error(gl::INVALID_VALUE);
        }
        if dst.len() < width as usize * height as usize * components {
            return self.set_error(gl::INVALID_OPERATION);
        }
        let block = match self.read_block(x, y, width, height) {
            Ok(block) => block,
            Err(error) => return self.set_error(error),
        };
        for (out, pixel) in dst.chunks_mut(components).zip(block.chunks(4)) {
            out.copy_from_slice(&pixel[..components]);
            if format == gl::BGRA {
                out.swap(0, 2);
            }
        }
    }

    fn fence_sync(&self) -> Option<GlFence> {
        let mut objects = self.objects.borrow_mut();
        if !self.features.sync || objects.fail_fences {
            return None;
        }
        objects.next_fence += 1;
        let fence = objects.next_fence;
        objects.fences.insert(fence);
        Some(GlFence(fence))
    }

    fn client_wait_sync(&self, fence: GlFence, _timeout_ns: u64) -> GLenum {
        self.counters.flushes.set(self.counters.flushes.get() + 1);
        let objects = self.objects.borrow();
        if !objects.fences.contains(&fence.0) {
            drop(objects);
            self.set_error(gl::INVALID_VALUE);
            gl::WAIT_FAILED
        } else if objects.stall_fences {
            gl::TIMEOUT_EXPIRED
        } else {
            gl::ALREADY_SIGNALED
        }
    }

    fn wait_sync(&self, fence: GlFence) {
        if !self.objects.borrow().fences.contains(&fence.0) {
            self.set_error(gl::INVALID_VALUE);
        }
    }

    fn delete_sync(&self, fence: GlFence) {
        self.objects.borrow_mut().fences.remove(&fence.0);
    }

    fn flush(&self) {
        self.counters.flushes.set(self.counters.flushes.get() + 1);
    }

    fn finish(&self) {
        self.counters.finishes.set(self.counters.finishes.get() + 1);
    }

    fn create_shader(&self, shader_type: GLenum) -> GLuint {
        let mut objects = self.objects.borrow_mut();
        let name = objects.gen_name();
        objects.shaders.insert(name, ShaderObject {
            shader_type,
            source: String::new(),
            compiled: false,
        });
        name
    }

    fn shader_source(&self, shader: GLuint, source: &str) {
        match self.objects.borrow_mut().shaders.get_mut(&shader) {
            Some(object) => object.source = source.to_owned(),
            None => return self.set_error(gl::INVALID_VALUE),
        }
    }

    fn compile_shader(&self, shader: GLuint) {
        if let Some(object) = self.objects.borrow_mut().shaders.get_mut(&shader) {
            object.compiled = object.source.contains("main");
        }
    }

    fn get_shader_iv(&self, shader: GLuint, pname: GLenum) -> GLint {
        let objects = self.objects.borrow();
        match (objects.shaders.get(&shader), pname) {
            (Some(object), gl::COMPILE_STATUS) => object.compiled as GLint,
            (Some(object), gl::SHADER_TYPE) => object.shader_type as GLint,
            _ => 0,
        }
    }

    fn get_shader_info_log(&self, _shader: GLuint) -> String {
        String::new()
    }

    fn delete_shader(&self, shader: GLuint) {
        self.objects.borrow_mut().shaders.remove(&shader);
    }

    fn create_program(&self) -> GLuint {
        let mut objects = self.objects.borrow_mut();
        let name = objects.gen_name();
        objects.programs.insert(name, ProgramObject::default());
        name
    }

    fn attach_shader(&self, program: GLuint, shader: GLuint) {
        if let Some(object) = self.objects.borrow_mut().programs.get_mut(&program) {
            object.shaders.push(shader);
        }
    }

    fn link_program(&self, program: GLuint) {
        let mut objects = self.objects.borrow_mut();
        let shaders: Vec<(GLenum, bool, String)> = match objects.programs.get(&program) {
            Some(object) => {
                object.shaders
                      .iter()
                      .filter_map(|shader| objects.shaders.get(shader))
                      .map(|shader| (shader.shader_type, shader.compiled, shader.source.clone()))
                      .collect()
            }
            None => return,
        };
        let has_vertex = shaders.iter().any(|s| s.0 == gl::VERTEX_SHADER && s.1);
        let fragment = shaders.iter().find(|s| s.0 == gl::FRAGMENT_SHADER && s.1);
        if let Some(object) = objects.programs.get_mut(&program) {
            object.linked = has_vertex && fragment.is_some();
            object.fragment_source = fragment.map(|s| s.2.clone()).unwrap_or_default();
        }
    }

    fn get_program_iv(&self, program: GLuint, pname: GLenum) -> GLint {
        let objects = self.objects.borrow();
        match (objects.programs.get(&program), pname) {
            (Some(object), gl::LINK_STATUS) => object.linked as GLint,
            _ => 0,
        }
    }

    fn use_program(&self, program: GLuint) {
        self.state.borrow_mut().program = program;
    }

    fn delete_program(&self, program: GLuint) {
        self.objects.borrow_mut().programs.remove(&program);
        let mut state = self.state.borrow_mut();
        if state.program == program {
            state.program = 0;
        }
    }

    fn get_attrib_location(&self, program: GLuint, name: &str) -> GLint {
        match self.objects.borrow_mut().programs.get_mut(&program) {
            Some(object) => {
                let next = object.attributes.len() as GLint;
                *object.attributes.entry(name.to_owned()).or_insert(next)
            }
            None => -1,
        }
    }

    fn get_uniform_location(&self, program: GLuint, name: &str) -> GLint {
        match self.objects.borrow_mut().programs.get_mut(&program) {
            Some(object) => {
                let next = object.uniforms.len() as GLint;
                *object.uniforms.entry(name.to_owned()).or_insert(next)
            }
            None => -1,
        }
    }

    fn uniform_1i(&self, location: GLint, v0: GLint) {
        let mut state = self.state.borrow_mut();
        let program = state.program;
        state.sampler_units.insert((program, location), v0);
    }

    fn uniform_2f(&self, _location: GLint, _v0: GLfloat, _v1: GLfloat) {}

    fn gen_buffer(&self) -> GLuint {
        let mut objects = self.objects.borrow_mut();
        let name = objects.gen_name();
        objects.buffers.insert(name, Vec::new());
        name
    }

    fn delete_buffer(&self, buffer: GLuint) {
        self.objects.borrow_mut().buffers.remove(&buffer);
    }

    fn bind_buffer(&self, target: GLenum, buffer: GLuint) {
        if target == gl::ARRAY_BUFFER {
            self.state.borrow_mut().array_buffer = buffer;
        }
    }

    fn buffer_data_f32(&self, _target: GLenum, data: &[f32], _usage: GLenum) {
        let buffer = self.state.borrow().array_buffer;
        if let Some(contents) = self.objects.borrow_mut().buffers.get_mut(&buffer) {
            *contents = data.to_vec();
        }
    }

    fn enable_vertex_attrib_array(&self, _index: GLuint) {}

    fn disable_vertex_attrib_array(&self, _index: GLuint) {}

    fn vertex_attrib_pointer_f32(&self, _index: GLuint, _size: GLint, _stride: GLsizei, _offset: GLuint) {}

    fn draw_arrays(&self, _mode: GLenum, _first: GLint, count: GLsizei) {
        let (program, fragment_source) = match self.program_fragment_source() {
            Some(program) => program,
            None => return self.set_error(gl::INVALID_OPERATION),
        };
        self.counters.draws.set(self.counters.draws.get() + 1);
        if count < 3 {
            return;
        }

        let rectangle = fragment_source.contains("sampler2DRect");
        let swap_red_blue = fragment_source.contains(".bgra");
        let (draw_framebuffer, viewport, clip, texture) = {
            let state = self.state.borrow();
            let unit = state.sampler_units
                            .iter()
                            .find(|&(&(owner, _), _)| owner == program)
                            .map_or(0, |(_, &unit)| unit) as GLuint;
            let target = if rectangle { gl::TEXTURE_RECTANGLE } else { gl::TEXTURE_2D };
            let texture = state.texture_bindings.get(&(unit, target)).cloned().unwrap_or(0);
            (state.draw_framebuffer, state.viewport, state.clip(), texture)
        };
        let destination = match self.color_target(draw_framebuffer) {
            Ok(destination) => destination,
            Err(error) => return self.set_error(error),
        };

        let mut objects = self.objects.borrow_mut();
        let source = match objects.textures.get(&texture).and_then(|object| object.image.as_ref()) {
            Some(image) => image.clone(),
            // Sampling an incomplete texture yields black.
            None => Image::new(1, 1, 0, ImageFormat::Rgba),
        };
        let destination = match objects.image_mut(destination) {
            Some(image) => image,
            None => return,
        };
        let [view_x, view_y, view_width, view_height] = viewport;
        for y in view_y..view_y + view_height {
            let v = (y - view_y) as f32 + 0.5;
            let source_y = (v * source.height as f32 / view_height as f32).floor() as i32;
            for x in view_x..view_x + view_width {
                if !destination.contains(x, y) || !inside_clip(clip, x, y) {
                    continue;
                }
                let u = (x - view_x) as f32 + 0.5;
                let source_x = (u * source.width as f32 / view_width as f32).floor() as i32;
                if !source.contains(source_x, source_y) {
                    continue;
                }
                let mut pixel = source.pixel(source_x, source_y);
                if swap_red_blue {
                    pixel.swap(0, 2);
                }
                destination.put_pixel(x, y, pixel);
            }
        }
    }
}
