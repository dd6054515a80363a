// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Surface allocation and recycling.
//!
//! The factory owns every surface it has issued. Consumers hold `SurfaceHandle`s; when the last
//! handle to a surface goes away a retirement message arrives here and the surface either goes
//! back to the free pool or is destroyed. Messages are only drained on the factory's own thread,
//! so no lock is ever held across GL calls.

use crate::config::{ContextCaps, SurfaceConfig};
use crate::context::{ContextId, GlContext};
use crate::error::SurfaceError;
use crate::framebuffer::DepthStencilBuffers;
use crate::handle::{RetireEvent, SurfaceHandle};
use crate::platform::surface::{self, BackendInfo, Mechanism};
use crate::shared_surface::{AccessState, SharedSurface, SurfaceId};

use crossbeam_channel::{Receiver, Sender};
use euclid::default::Size2D;
use log::{debug, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FactoryId(u64);

impl FactoryId {
    fn next() -> FactoryId {
        static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);
        FactoryId(NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for FactoryId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "FactoryId({})", self.0)
    }
}

/// A snapshot of the recycling bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Every surface the factory owns and has not destroyed.
    pub total: usize,
    /// Surfaces with at least one live handle.
    pub leased: usize,
    /// Retired surfaces waiting for reuse.
    pub free: usize,
}

pub struct SurfaceFactory {
    id: FactoryId,
    owner: ContextId,
    mechanism: Mechanism,
    backend: BackendInfo,
    caps: ContextCaps,
    config: SurfaceConfig,
    surfaces: HashMap<SurfaceId, SharedSurface>,
    leased: HashSet<SurfaceId>,
    free_pool: VecDeque<SurfaceId>,
    depth_stencil: Option<DepthStencilBuffers>,
    retire_sender: Sender<RetireEvent>,
    retire_receiver: Receiver<RetireEvent>,
}

impl SurfaceFactory {
    pub fn new(ctx: &GlContext, backend: BackendInfo, caps: ContextCaps, config: SurfaceConfig)
               -> SurfaceFactory {
        let mechanism = surface::select_mechanism(ctx, &backend, &config);
        let (retire_sender, retire_receiver) = crossbeam_channel::unbounded();
        let factory = SurfaceFactory {
            id: FactoryId::next(),
            owner: ctx.id(),
            mechanism,
            backend,
            caps,
            config,
            surfaces: HashMap::new(),
            leased: HashSet::new(),
            free_pool: VecDeque::new(),
            depth_stencil: None,
            retire_sender,
            retire_receiver,
        };
        debug!("SurfaceFactory::new: {:?} using {:?}", factory.id, mechanism);
        factory
    }

    pub fn id(&self) -> FactoryId {
        self.id
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn backend(&self) -> &BackendInfo {
        &self.backend
    }

    pub fn caps(&self) -> &ContextCaps {
        &self.caps
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Multisampled contexts keep depth and stencil on their draw buffer instead.
    fn wants_depth_stencil(&self) -> bool {
        (self.caps.depth || self.caps.stencil) && !self.caps.antialias
    }

    pub fn depth_stencil_size(&self) -> Option<Size2D<i32>> {
        self.depth_stencil.as_ref().map(|buffers| buffers.size)
    }

    fn ensure_depth_stencil(&mut self, ctx: &GlContext, size: Size2D<i32>)
                            -> Result<(), SurfaceError> {
        if !self.wants_depth_stencil() || self.depth_stencil_size() == Some(size) {
            return Ok(());
        }

        let gl = ctx.gl();
        if let Some(mut old) = self.depth_stencil.take() {
            for surface in self.surfaces.values_mut() {
                surface.attach_depth_stencil(ctx, None);
            }
            old.destroy(gl);
        }
        debug!("SurfaceFactory: depth/stencil now {}x{}", size.width, size.height);
        self.depth_stencil = Some(DepthStencilBuffers::new(ctx,
                                                           size,
                                                           0,
                                                           self.caps.depth,
                                                           self.caps.stencil)?);
        Ok(())
    }

    /// Allocates a surface the factory does not track. The caller owns it and must `destroy`
    /// it.
    pub fn new_surface(&mut self, ctx: &GlContext, size: Size2D<i32>)
                       -> Result<SharedSurface, SurfaceError> {
        ctx.check_owner(self.owner)?;
        self.ensure_depth_stencil(ctx, size)?;
        SharedSurface::new(ctx,
                           self.mechanism,
                           &self.backend,
                           size,
                           self.caps.alpha,
                           &self.config,
                           self.depth_stencil.as_ref())
    }

    /// Issues a surface of `size`, reusing a pooled one when possible.
    pub fn new_client(&mut self, ctx: &GlContext, size: Size2D<i32>)
                      -> Result<SurfaceHandle, SurfaceError> {
        self.process_retired(ctx);

        while let Some(id) = self.free_pool.pop_front() {
            let matches = self.surfaces.get(&id).map_or(false, |surface| surface.size() == size);
            if matches {
                if let Err(error) = self.ensure_depth_stencil(ctx, size) {
                    self.free_pool.push_front(id);
                    return Err(error);
                }
                let depth_stencil = if self.wants_depth_stencil() {
                    self.depth_stencil.as_ref()
                } else {
                    None
                };
                if let Some(surface) = self.surfaces.get_mut(&id) {
                    surface.wait_for_buffer_ownership();
                    if depth_stencil.is_some() && !surface.has_depth_stencil() {
                        surface.attach_depth_stencil(ctx, depth_stencil);
                    }
                }
                debug!("SurfaceFactory: reusing {:?}", id);
                return Ok(self.lease(id));
            }
            debug!("SurfaceFactory: evicting mismatched {:?}", id);
            self.destroy_surface(ctx, id);
        }

        let surface = self.new_surface(ctx, size)?;
        let id = surface.id();
        self.surfaces.insert(id, surface);
        Ok(self.lease(id))
    }

    fn lease(&mut self, id: SurfaceId) -> SurfaceHandle {
        let surface = self.get_or_panic(id);
        let handle = SurfaceHandle::new(surface,
                                        self.id,
                                        self.caps.premultiplied_alpha,
                                        self.retire_sender.clone());
        self.leased.insert(id);
        handle
    }

    fn get_or_panic(&self, id: SurfaceId) -> &SharedSurface {
        match self.surfaces.get(&id) {
            Some(surface) => surface,
            None => panic!("{:?} does not belong to {:?}", id, self.id),
        }
    }

    fn take(&mut self, id: SurfaceId) -> SharedSurface {
        match self.surfaces.remove(&id) {
            Some(surface) => surface,
            None => panic!("{:?} does not belong to {:?}", id, self.id),
        }
    }

    fn destroy_surface(&mut self, ctx: &GlContext, id: SurfaceId) {
        if let Some(mut surface) = self.surfaces.remove(&id) {
            surface.destroy(ctx);
        }
    }

    /// Drains retirement messages, pooling or destroying each retired surface.
    pub fn process_retired(&mut self, ctx: &GlContext) {
        while let Ok(event) = self.retire_receiver.try_recv() {
            self.retire(ctx, event.surface);
        }
    }

    fn retire(&mut self, ctx: &GlContext, id: SurfaceId) {
        if !self.leased.remove(&id) {
            return;
        }
        let recyclable = match self.surfaces.get(&id) {
            Some(surface) => {
                assert_eq!(surface.state(), AccessState::Idle,
                           "last handle to {:?} dropped while {:?}", id, surface.state());
                surface.can_recycle() && surface.mechanism() == self.mechanism
            }
            None => return,
        };

        if recyclable && self.free_pool.len() < self.config.recycle_pool_capacity {
            debug!("SurfaceFactory: recycling {:?}", id);
            self.free_pool.push_back(id);
        } else {
            debug!("SurfaceFactory: destroying retired {:?}", id);
            self.destroy_surface(ctx, id);
        }
    }

    /// Copies `source` into `destination`, both issued by this factory. The destination must be
    /// write-acquired and the source idle; the source is read-acquired before the destination
    /// is written.
    pub fn copy_between(&mut self, ctx: &GlContext, destination: SurfaceId, source: SurfaceId)
                        -> Result<(), SurfaceError> {
        assert_ne!(destination, source, "copying {:?} onto itself", source);
        let mut source_surface = self.take(source);
        let result = match self.surfaces.get_mut(&destination) {
            Some(destination_surface) => {
                match source_surface.producer_read_acquire(ctx) {
                    Ok(()) => {
                        let copied = destination_surface.copy_from(ctx, &source_surface);
                        let released = source_surface.producer_read_release(ctx);
                        copied.and(released)
                    }
                    Err(error) => Err(error),
                }
            }
            None => panic!("{:?} does not belong to {:?}", destination, self.id),
        };
        self.surfaces.insert(source, source_surface);
        result
    }

    /// Duplicates a surface from another allocator into a fresh client of this factory.
    pub fn clone_client(&mut self, ctx: &GlContext, source: &mut SharedSurface)
                        -> Result<SurfaceHandle, SurfaceError> {
        let handle = self.new_client(ctx, source.size())?;
        let id = handle.surface_id();
        let mut destination = self.take(id);
        let result = SurfaceFactory::copy_whole(ctx, &mut destination, source);
        self.surfaces.insert(id, destination);
        result.map(|()| handle)
    }

    /// Duplicates a surface this factory issued into a fresh client.
    pub fn clone_leased(&mut self, ctx: &GlContext, source: &SurfaceHandle)
                        -> Result<SurfaceHandle, SurfaceError> {
        assert_eq!(source.factory_id(), self.id, "{:?} was issued elsewhere", source);
        let handle = self.new_client(ctx, source.size())?;
        let id = handle.surface_id();
        let mut destination = self.take(id);
        let mut source_surface = self.take(source.surface_id());
        let result = SurfaceFactory::copy_whole(ctx, &mut destination, &mut source_surface);
        self.surfaces.insert(source.surface_id(), source_surface);
        self.surfaces.insert(id, destination);
        result.map(|()| handle)
    }

    fn copy_whole(ctx: &GlContext, destination: &mut SharedSurface, source: &mut SharedSurface)
                  -> Result<(), SurfaceError> {
        ctx.check_owner(destination.owner())?;
        ctx.check_owner(source.owner())?;
        destination.producer_acquire(ctx)?;
        source.producer_read_acquire(ctx)?;
        let copied = destination.copy_from(ctx, source);
        source.producer_read_release(ctx)?;
        destination.producer_release(ctx)?;
        copied
    }

    /// Switches to the mechanism `backend` calls for. Only a basic factory morphs unless
    /// `force` is set. Returns whether the mechanism changed.
    pub fn morph(&mut self, ctx: &GlContext, backend: BackendInfo, force: bool) -> bool {
        if self.mechanism != Mechanism::Basic && !force {
            debug!("SurfaceFactory: not morphing away from {:?}", self.mechanism);
            return false;
        }

        let mechanism = surface::select_mechanism(ctx, &backend, &self.config);
        self.backend = backend;
        if mechanism == self.mechanism {
            return false;
        }

        debug!("SurfaceFactory: morphing {:?} -> {:?}", self.mechanism, mechanism);
        self.mechanism = mechanism;
        while let Some(id) = self.free_pool.pop_front() {
            self.destroy_surface(ctx, id);
        }
        // Leased surfaces of the old mechanism are destroyed when they retire.
        for id in &self.leased {
            if let Some(surface) = self.surfaces.get_mut(id) {
                surface.set_can_recycle(false);
            }
        }
        true
    }

    pub fn get(&self, id: SurfaceId) -> Option<&SharedSurface> {
        self.surfaces.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut SharedSurface> {
        self.surfaces.get_mut(&id)
    }

    pub fn is_pooled(&self, id: SurfaceId) -> bool {
        self.free_pool.contains(&id)
    }

    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            total: self.surfaces.len(),
            leased: self.leased.len(),
            free: self.free_pool.len(),
        }
    }

    /// Destroys every surface, leased or not. Outstanding handles keep only their CPU-side
    /// state.
    pub fn destroy(&mut self, ctx: &GlContext) {
        self.process_retired(ctx);
        if !self.leased.is_empty() {
            warn!("SurfaceFactory {:?} destroyed with {} surfaces still leased",
                  self.id,
                  self.leased.len());
        }
        self.free_pool.clear();
        self.leased.clear();
        for (_, mut surface) in self.surfaces.drain() {
            surface.destroy(ctx);
        }
        if let Some(mut buffers) = self.depth_stencil.take() {
            if ctx.is_alive() {
                buffers.destroy(ctx.gl());
            }
        }
    }
}

impl Drop for SurfaceFactory {
    fn drop(&mut self) {
        if self.surfaces.is_empty() {
            return;
        }
        warn!("SurfaceFactory {:?} dropped without destroy(); leaking {} surfaces",
              self.id,
              self.surfaces.len());
        for surface in self.surfaces.values_mut() {
            surface.forget();
        }
    }
}
