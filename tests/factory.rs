// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod common;

use common::{all_pixels_are, TestContext, GREEN};
use euclid::default::Size2D;
use proptest::prelude::*;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use webgl_surface::config::{ContextCaps, SurfaceConfig};
use webgl_surface::factory::SurfaceFactory;
use webgl_surface::gl;
use webgl_surface::handle::SurfaceHandle;
use webgl_surface::platform::surface::{BackendInfo, Mechanism};
use webgl_surface::readback::{readback, ReadbackOptions};

fn factory(test: &TestContext, backend: BackendInfo) -> SurfaceFactory {
    SurfaceFactory::new(&test.ctx, backend, ContextCaps::default(), SurfaceConfig::default())
}

fn same_process(test: &TestContext) -> BackendInfo {
    BackendInfo::SameProcess { share_group: test.ctx.share_group() }
}

#[derive(Clone, Debug)]
enum Op {
    Issue(usize),
    Drop(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0..2usize).prop_map(Op::Issue), (0..8usize).prop_map(Op::Drop)]
}

const SIZES: [(i32, i32); 2] = [(8, 8), (16, 16)];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn free_pool_stays_bounded(ops in prop::collection::vec(op(), 1..40)) {
        let test = TestContext::new();
        let mut factory = factory(&test, BackendInfo::Placeholder);
        let mut handles: Vec<SurfaceHandle> = Vec::new();
        let mut retired = HashSet::new();

        for op in ops {
            match op {
                Op::Issue(index) => {
                    let (width, height) = SIZES[index];
                    let handle = factory.new_client(&test.ctx, Size2D::new(width, height)).unwrap();
                    prop_assert_eq!(handle.size(), Size2D::new(width, height));
                    retired.remove(&handle.surface_id());
                    handles.push(handle);
                }
                Op::Drop(index) => {
                    if !handles.is_empty() {
                        let handle = handles.remove(index % handles.len());
                        retired.insert(handle.surface_id());
                    }
                }
            }
            factory.process_retired(&test.ctx);

            let stats = factory.pool_stats();
            prop_assert!(stats.free <= 2);
            prop_assert_eq!(stats.leased, handles.len());
            prop_assert_eq!(stats.total, stats.leased + stats.free);
            for id in &retired {
                if factory.is_pooled(*id) {
                    prop_assert!(factory.get(*id).is_some());
                }
            }
            for handle in &handles {
                prop_assert!(!factory.is_pooled(handle.surface_id()));
            }
        }

        handles.clear();
        factory.destroy(&test.ctx);
    }
}

#[test]
fn retired_surfaces_are_reissued() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let size = Size2D::new(16, 16);

    let first = factory.new_client(&test.ctx, size).unwrap();
    let id = first.surface_id();
    drop(first);
    let allocations = test.soft.allocation_count();

    let second = factory.new_client(&test.ctx, size).unwrap();
    assert_eq!(second.surface_id(), id);
    assert_eq!(test.soft.allocation_count(), allocations);

    drop(second);
    factory.destroy(&test.ctx);
}

#[test]
fn mismatched_pool_entries_are_evicted() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let small = factory.new_client(&test.ctx, Size2D::new(8, 8)).unwrap();
    let small_id = small.surface_id();
    drop(small);
    factory.process_retired(&test.ctx);
    assert!(factory.is_pooled(small_id));

    let large = factory.new_client(&test.ctx, Size2D::new(32, 32)).unwrap();
    assert_ne!(large.surface_id(), small_id);
    assert!(factory.get(small_id).is_none());
    assert_eq!(factory.pool_stats().free, 0);

    drop(large);
    factory.destroy(&test.ctx);
}

#[test]
fn pool_overflow_is_destroyed() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let size = Size2D::new(8, 8);
    let handles: Vec<_> = (0..3).map(|_| factory.new_client(&test.ctx, size).unwrap()).collect();
    assert_eq!(factory.pool_stats().total, 3);

    drop(handles);
    factory.process_retired(&test.ctx);
    let stats = factory.pool_stats();
    assert_eq!(stats.free, 2);
    assert_eq!(stats.total, 2);
    assert_eq!(stats.leased, 0);
    factory.destroy(&test.ctx);
}

#[test]
fn pool_capacity_is_configurable() {
    let test = TestContext::new();
    let config = SurfaceConfig { recycle_pool_capacity: 0, ..SurfaceConfig::default() };
    let mut factory = SurfaceFactory::new(&test.ctx,
                                          BackendInfo::Placeholder,
                                          ContextCaps::default(),
                                          config);
    let handle = factory.new_client(&test.ctx, Size2D::new(8, 8)).unwrap();
    drop(handle);
    factory.process_retired(&test.ctx);
    assert_eq!(factory.pool_stats().total, 0);
    factory.destroy(&test.ctx);
}

#[test]
fn clones_keep_every_live_handle_leased() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let handle = factory.new_client(&test.ctx, Size2D::new(8, 8)).unwrap();
    let clone = handle.clone();
    assert_eq!(handle.lease_count(), 2);
    assert!(handle.ptr_eq(&clone));

    drop(handle);
    factory.process_retired(&test.ctx);
    assert_eq!(factory.pool_stats().leased, 1);

    drop(clone);
    factory.process_retired(&test.ctx);
    assert_eq!(factory.pool_stats().leased, 0);
    assert_eq!(factory.pool_stats().free, 1);
    factory.destroy(&test.ctx);
}

#[test]
fn handles_retire_from_other_threads() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let handle = factory.new_client(&test.ctx, Size2D::new(8, 8)).unwrap();
    let id = handle.surface_id();

    thread::spawn(move || drop(handle)).join().unwrap();
    factory.process_retired(&test.ctx);
    assert!(factory.is_pooled(id));
    factory.destroy(&test.ctx);
}

#[test]
fn clone_leased_copies_content() {
    let test = TestContext::new();
    let mut factory = factory(&test, same_process(&test));
    let size = Size2D::new(4, 4);
    let original = factory.new_client(&test.ctx, size).unwrap();
    {
        let surface = factory.get_mut(original.surface_id()).unwrap();
        surface.producer_acquire(&test.ctx).unwrap();
        test.clear_framebuffer(surface.framebuffer(), GREEN);
        surface.producer_release(&test.ctx).unwrap();
    }

    let copy = factory.clone_leased(&test.ctx, &original).unwrap();
    assert_ne!(copy.surface_id(), original.surface_id());
    let surface = factory.get(copy.surface_id()).unwrap();
    let mut pixels = vec![0; 64];
    surface.read_pixels(&test.ctx, 0, 0, 4, 4, gl::RGBA, gl::UNSIGNED_BYTE, &mut pixels).unwrap();
    assert!(all_pixels_are(&pixels, GREEN));

    drop((original, copy));
    factory.destroy(&test.ctx);
}

#[test]
fn clone_client_imports_foreign_surfaces() {
    let test = TestContext::new();
    let mut producer = factory(&test, BackendInfo::Placeholder);
    let mut importer = factory(&test, same_process(&test));
    let size = Size2D::new(4, 4);

    let mut source = producer.new_surface(&test.ctx, size).unwrap();
    source.producer_acquire(&test.ctx).unwrap();
    test.clear_framebuffer(source.framebuffer(), GREEN);
    source.producer_release(&test.ctx).unwrap();

    let copy = importer.clone_client(&test.ctx, &mut source).unwrap();
    assert_eq!(copy.mechanism(), Mechanism::SharedTexture);
    let pixels = test.read_framebuffer(importer.get(copy.surface_id()).unwrap().framebuffer(), size);
    assert!(all_pixels_are(&pixels, GREEN));

    drop(copy);
    source.destroy(&test.ctx);
    producer.destroy(&test.ctx);
    importer.destroy(&test.ctx);
}

#[test]
fn basic_factories_morph() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let size = Size2D::new(8, 8);
    let leased = factory.new_client(&test.ctx, size).unwrap();
    let pooled = factory.new_client(&test.ctx, size).unwrap();
    let pooled_id = pooled.surface_id();
    drop(pooled);
    factory.process_retired(&test.ctx);

    assert!(factory.morph(&test.ctx, same_process(&test), false));
    assert_eq!(factory.mechanism(), Mechanism::SharedTexture);
    assert!(factory.get(pooled_id).is_none());
    assert!(!factory.get(leased.surface_id()).unwrap().can_recycle());

    drop(leased);
    factory.process_retired(&test.ctx);
    assert_eq!(factory.pool_stats().total, 0);

    let fresh = factory.new_client(&test.ctx, size).unwrap();
    assert_eq!(fresh.mechanism(), Mechanism::SharedTexture);
    drop(fresh);
    factory.destroy(&test.ctx);
}

#[test]
fn sharing_factories_only_morph_when_forced() {
    let test = TestContext::new();
    let mut factory = factory(&test, same_process(&test));
    assert!(!factory.morph(&test.ctx, BackendInfo::Placeholder, false));
    assert_eq!(factory.mechanism(), Mechanism::SharedTexture);
    assert!(factory.morph(&test.ctx, BackendInfo::Placeholder, true));
    assert_eq!(factory.mechanism(), Mechanism::Basic);
    factory.destroy(&test.ctx);
}

#[test]
fn foreign_share_groups_read_back() {
    let test = TestContext::new();
    let other = test.unrelated();
    let factory = factory(&test, same_process(&other));
    assert_eq!(factory.mechanism(), Mechanism::Basic);
}

#[test]
fn forced_mechanism_wins_when_available() {
    let test = TestContext::new();
    let config = SurfaceConfig {
        force_mechanism: Some(Mechanism::SharedTexture),
        ..SurfaceConfig::default()
    };
    let factory = SurfaceFactory::new(&test.ctx,
                                      BackendInfo::Placeholder,
                                      ContextCaps::default(),
                                      config);
    assert_eq!(factory.mechanism(), Mechanism::SharedTexture);
}

#[test]
fn depth_stencil_follows_the_requested_size() {
    let test = TestContext::new();
    let caps = ContextCaps { depth: true, stencil: true, ..ContextCaps::default() };
    let mut factory = SurfaceFactory::new(&test.ctx,
                                          BackendInfo::Placeholder,
                                          caps,
                                          SurfaceConfig::default());
    let small = Size2D::new(8, 8);
    let large = Size2D::new(16, 16);

    let first = factory.new_client(&test.ctx, small).unwrap();
    assert_eq!(factory.depth_stencil_size(), Some(small));
    assert!(factory.get(first.surface_id()).unwrap().has_depth_stencil());

    let second = factory.new_client(&test.ctx, large).unwrap();
    assert_eq!(factory.depth_stencil_size(), Some(large));
    assert!(!factory.get(first.surface_id()).unwrap().has_depth_stencil());
    assert!(factory.get(second.surface_id()).unwrap().has_depth_stencil());

    let first_id = first.surface_id();
    drop((first, second));
    let reissued = factory.new_client(&test.ctx, small).unwrap();
    assert_eq!(reissued.surface_id(), first_id);
    assert_eq!(factory.depth_stencil_size(), Some(small));
    assert!(factory.get(first_id).unwrap().has_depth_stencil());

    drop(reissued);
    factory.destroy(&test.ctx);
}

#[test]
fn antialiased_factories_skip_depth_stencil() {
    let test = TestContext::new();
    let caps = ContextCaps { antialias: true, depth: true, ..ContextCaps::default() };
    let mut factory = SurfaceFactory::new(&test.ctx,
                                          BackendInfo::Placeholder,
                                          caps,
                                          SurfaceConfig::default());
    let handle = factory.new_client(&test.ctx, Size2D::new(8, 8)).unwrap();
    assert_eq!(factory.depth_stencil_size(), None);
    drop(handle);
    factory.destroy(&test.ctx);
}

#[test]
fn consumers_hold_shared_textures_until_release() {
    let test = TestContext::new();
    let mut factory = factory(&test, same_process(&test));
    let handle = factory.new_client(&test.ctx, Size2D::new(4, 4)).unwrap();
    let id = handle.surface_id();

    factory.get_mut(id).unwrap().producer_acquire(&test.ctx).unwrap();
    assert!(!handle.consumer_acquire(Duration::from_millis(10)));
    factory.get_mut(id).unwrap().producer_release(&test.ctx).unwrap();
    assert!(handle.release_fence().is_some());

    assert!(handle.consumer_acquire(Duration::from_millis(10)));
    assert!(handle.is_consumer_acquired());
    handle.consumer_release();
    assert!(!handle.is_consumer_acquired());

    assert!(handle.consumer_acquire(Duration::from_millis(10)));
    // Dropping the last handle gives the mutex back, so reissuing does not block.
    drop(handle);
    let reissued = factory.new_client(&test.ctx, Size2D::new(4, 4)).unwrap();
    assert_eq!(reissued.surface_id(), id);
    drop(reissued);
    factory.destroy(&test.ctx);
}

#[test]
fn clones_wait_for_each_other() {
    let test = TestContext::new();
    let mut factory = factory(&test, same_process(&test));
    let first = factory.new_client(&test.ctx, Size2D::new(4, 4)).unwrap();
    let id = first.surface_id();
    factory.get_mut(id).unwrap().producer_acquire(&test.ctx).unwrap();
    factory.get_mut(id).unwrap().producer_release(&test.ctx).unwrap();

    let second = first.clone();
    assert!(first.consumer_acquire(Duration::from_millis(10)));
    assert!(!second.is_consumer_acquired());
    assert!(!second.consumer_acquire(Duration::from_millis(10)));

    let waiter = thread::spawn(move || {
        let acquired = second.consumer_acquire(Duration::from_secs(5));
        second.consumer_release();
        acquired
    });
    thread::sleep(Duration::from_millis(20));
    first.consumer_release();
    assert!(waiter.join().unwrap());

    // Dropping the clone that holds the surface hands it on.
    let third = first.clone();
    assert!(third.consumer_acquire(Duration::from_millis(10)));
    drop(third);
    assert!(first.consumer_acquire(Duration::from_millis(10)));
    drop(first);
    factory.destroy(&test.ctx);
}

#[test]
fn readback_keeps_the_callers_access() {
    let test = TestContext::new();
    let consumer = test.shared();
    let mut factory = factory(&test, same_process(&test));
    let handle = factory.new_client(&test.ctx, Size2D::new(2, 2)).unwrap();
    let id = handle.surface_id();
    factory.get_mut(id).unwrap().producer_acquire(&test.ctx).unwrap();
    factory.get_mut(id).unwrap().producer_release(&test.ctx).unwrap();

    let mut pixels = vec![0; 16];
    readback(&handle, Some(&consumer.ctx), &mut pixels, ReadbackOptions::default()).unwrap();
    assert!(!handle.is_consumer_acquired());

    assert!(handle.consumer_acquire(Duration::from_millis(10)));
    readback(&handle, Some(&consumer.ctx), &mut pixels, ReadbackOptions::default()).unwrap();
    assert!(handle.is_consumer_acquired());
    assert!(!handle.clone().consumer_acquire(Duration::from_millis(10)));
    handle.consumer_release();

    drop(handle);
    factory.destroy(&test.ctx);
}

#[test]
fn basic_handles_never_contend() {
    let test = TestContext::new();
    let mut factory = factory(&test, BackendInfo::Placeholder);
    let handle = factory.new_client(&test.ctx, Size2D::new(4, 4)).unwrap();
    assert!(handle.consumer_acquire(Duration::from_millis(0)));
    assert!(!handle.is_consumer_acquired());
    assert!(handle.to_transfer_descriptor().is_err());
    drop(handle);
    factory.destroy(&test.ctx);
}
