// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! GL contexts as seen by the surface layer.
//!
//! Surfaces never point at their context. They remember a `ContextId`, and every operation
//! receives the context explicitly and checks it against the registry before touching GL.

use crate::blit::BlitHelper;
use crate::error::SurfaceError;
use crate::gl::{self, GLint, GlDriver, GlFeatures};
use crate::shared_surface::SurfaceId;

use log::{debug, warn};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A generational index into a `ContextRegistry`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for ContextId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "ContextId({}v{})", self.index, self.generation)
    }
}

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    alive: bool,
    occupied: bool,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Tracks which GL contexts are still usable. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct ContextRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ContextRegistry {
    pub fn new() -> ContextRegistry {
        ContextRegistry::default()
    }

    pub fn register(&self) -> ContextId {
        let mut inner = self.inner.lock();
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.alive = true;
            slot.occupied = true;
            return ContextId { index, generation: slot.generation };
        }

        let index = inner.slots.len() as u32;
        inner.slots.push(Slot { generation: 0, alive: true, occupied: true });
        ContextId { index, generation: 0 }
    }

    pub fn unregister(&self, id: ContextId) {
        let mut inner = self.inner.lock();
        let matches = match inner.slots.get(id.index as usize) {
            Some(slot) => slot.occupied && slot.generation == id.generation,
            None => false,
        };
        if matches {
            let slot = &mut inner.slots[id.index as usize];
            slot.alive = false;
            slot.occupied = false;
            inner.free.push(id.index);
        }
    }

    /// The context still exists but its GL objects are gone.
    pub fn mark_lost(&self, id: ContextId) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(id.index as usize) {
            if slot.occupied && slot.generation == id.generation {
                slot.alive = false;
            }
        }
    }

    pub fn is_alive(&self, id: ContextId) -> bool {
        let inner = self.inner.lock();
        match inner.slots.get(id.index as usize) {
            Some(slot) => slot.occupied && slot.alive && slot.generation == id.generation,
            None => false,
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().slots.iter().filter(|slot| slot.occupied && slot.alive).count()
    }
}

/// Driver limits queried once at context creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlLimits {
    pub max_renderbuffer_size: i32,
    pub max_texture_size: i32,
    pub max_samples: i32,
}

impl GlLimits {
    fn query(gl: &dyn GlDriver, features: GlFeatures) -> GlLimits {
        let max_samples = if features.framebuffer_multisample {
            gl.get_integer(gl::MAX_SAMPLES)
        } else {
            0
        };
        GlLimits {
            max_renderbuffer_size: gl.get_integer(gl::MAX_RENDERBUFFER_SIZE),
            max_texture_size: gl.get_integer(gl::MAX_TEXTURE_SIZE),
            max_samples,
        }
    }

    /// The largest dimension any allocation may request.
    pub fn max_surface_dimension(&self) -> i32 {
        self.max_renderbuffer_size.max(self.max_texture_size)
    }
}

/// Receives the one signal this subsystem sends upward.
pub trait ContextObserver {
    /// An unrecoverable allocation or driver fault occurred. The owner must tear the context
    /// down and may recreate it later.
    fn notify_context_lost(&self);
}

/// A producer or consumer GL context.
pub struct GlContext {
    id: ContextId,
    registry: ContextRegistry,
    gl: Rc<dyn GlDriver>,
    features: GlFeatures,
    limits: GlLimits,
    locked_surface: Cell<Option<SurfaceId>>,
    blit_helper: RefCell<BlitHelper>,
}

impl GlContext {
    pub fn new(registry: &ContextRegistry, gl: Rc<dyn GlDriver>) -> Rc<GlContext> {
        let features = gl.features();
        let limits = GlLimits::query(&*gl, features);
        let id = registry.register();
        debug!("GlContext::new: {:?} limits {:?} features {:?}", id, limits, features);
        Rc::new(GlContext {
            id,
            registry: registry.clone(),
            gl,
            features,
            limits,
            locked_surface: Cell::new(None),
            blit_helper: RefCell::new(BlitHelper::new()),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn gl(&self) -> &dyn GlDriver {
        &*self.gl
    }

    pub fn driver(&self) -> &Rc<dyn GlDriver> {
        &self.gl
    }

    pub fn features(&self) -> GlFeatures {
        self.features
    }

    pub fn limits(&self) -> GlLimits {
        self.limits
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn share_group(&self) -> u64 {
        self.gl.share_group()
    }

    pub fn is_alive(&self) -> bool {
        self.registry.is_alive(self.id)
    }

    pub fn mark_lost(&self) {
        warn!("GlContext {:?} lost", self.id);
        self.registry.mark_lost(self.id);
    }

    /// Errors unless this is the live context `owner`.
    pub fn check_owner(&self, owner: ContextId) -> Result<(), SurfaceError> {
        assert_eq!(self.id, owner, "surface used with a foreign GL context");
        if !self.is_alive() {
            return Err(SurfaceError::ContextLost);
        }
        Ok(())
    }

    pub fn blit_helper(&self) -> RefMut<BlitHelper> {
        self.blit_helper.borrow_mut()
    }

    pub fn locked_surface(&self) -> Option<SurfaceId> {
        self.locked_surface.get()
    }

    pub(crate) fn set_locked_surface(&self, surface: Option<SurfaceId>) {
        self.locked_surface.set(surface)
    }

    /// Drains the error queue and returns the first error, if any.
    pub fn take_error(&self) -> Option<gl::GLenum> {
        let first = self.gl.get_error();
        if first == gl::NO_ERROR {
            return None;
        }
        // A lost context may report errors forever.
        for _ in 0..32 {
            if self.gl.get_error() == gl::NO_ERROR {
                break;
            }
        }
        Some(first)
    }

    pub fn get_integer(&self, name: gl::GLenum) -> GLint {
        self.gl.get_integer(name)
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        if self.is_alive() {
            self.blit_helper.borrow_mut().destroy(&*self.gl);
        }
        self.registry.unregister(self.id);
    }
}
