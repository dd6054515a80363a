// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod common;

use common::{all_pixels_are, TestContext, GREEN, RED};
use euclid::default::Size2D;
use proptest::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use webgl_surface::config::SurfaceConfig;
use webgl_surface::gl::{self, GlFeatures};
use webgl_surface::platform::surface::{BackendInfo, Mechanism, TransferDescriptor};
use webgl_surface::shared_surface::{AccessState, SharedSurface};
use webgl_surface::soft::SoftLimits;
use webgl_surface::SurfaceError;

fn surface(test: &TestContext, mechanism: Mechanism, size: Size2D<i32>) -> SharedSurface {
    SharedSurface::new(&test.ctx,
                       mechanism,
                       &BackendInfo::Placeholder,
                       size,
                       true,
                       &SurfaceConfig::default(),
                       None)
        .unwrap()
}

/// Renders a solid color into `surface` and hands it off.
fn paint(test: &TestContext, surface: &mut SharedSurface, color: [u8; 4]) {
    surface.producer_acquire(&test.ctx).unwrap();
    test.clear_framebuffer(surface.framebuffer(), color);
    surface.producer_release(&test.ctx).unwrap();
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Acquire,
    Release,
    ReadAcquire,
    ReadRelease,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Acquire), Just(Op::Release), Just(Op::ReadAcquire), Just(Op::ReadRelease)]
}

fn mechanism() -> impl Strategy<Value = Mechanism> {
    prop_oneof![Just(Mechanism::Basic), Just(Mechanism::SharedTexture)]
}

fn legal(state: AccessState, op: Op) -> Option<AccessState> {
    match (state, op) {
        (AccessState::Idle, Op::Acquire) => Some(AccessState::WriteAcquired),
        (AccessState::WriteAcquired, Op::Release) => Some(AccessState::Idle),
        (AccessState::Idle, Op::ReadAcquire) => Some(AccessState::ReadAcquired),
        (AccessState::ReadAcquired, Op::ReadRelease) => Some(AccessState::Idle),
        _ => None,
    }
}

fn apply(test: &TestContext, surface: &mut SharedSurface, op: Op) {
    let result = match op {
        Op::Acquire => surface.producer_acquire(&test.ctx),
        Op::Release => surface.producer_release(&test.ctx),
        Op::ReadAcquire => surface.producer_read_acquire(&test.ctx),
        Op::ReadRelease => surface.producer_read_release(&test.ctx),
    };
    result.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn write_and_read_access_never_overlap(mechanism in mechanism(),
                                           ops in prop::collection::vec(op(), 1..24)) {
        let test = TestContext::new();
        let mut surface = surface(&test, mechanism, Size2D::new(4, 4));

        for op in ops {
            let before = surface.state();
            match legal(before, op) {
                Some(after) => {
                    apply(&test, &mut surface, op);
                    prop_assert_eq!(surface.state(), after);
                }
                None => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        apply(&test, &mut surface, op)
                    }));
                    prop_assert!(outcome.is_err(), "{:?} from {:?} did not panic", op, before);
                    prop_assert_eq!(surface.state(), before);
                }
            }
            prop_assert!(!(surface.is_write_acquired() && surface.is_read_acquired()));
        }

        match surface.state() {
            AccessState::WriteAcquired => surface.producer_release(&test.ctx).unwrap(),
            AccessState::ReadAcquired => surface.producer_read_release(&test.ctx).unwrap(),
            AccessState::Idle => {}
        }
        surface.destroy(&test.ctx);
    }
}

#[test]
fn same_mechanism_copy_takes_the_fast_path() {
    let test = TestContext::new();
    let size = Size2D::new(8, 8);
    let mut source = surface(&test, Mechanism::SharedTexture, size);
    let mut destination = surface(&test, Mechanism::SharedTexture, size);
    paint(&test, &mut source, RED);

    let blits = test.soft.blit_count();
    source.producer_read_acquire(&test.ctx).unwrap();
    destination.producer_acquire(&test.ctx).unwrap();
    destination.copy_from(&test.ctx, &source).unwrap();
    source.producer_read_release(&test.ctx).unwrap();

    assert_eq!(test.soft.blit_count(), blits);
    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, RED));

    destination.producer_release(&test.ctx).unwrap();
    source.destroy(&test.ctx);
    destination.destroy(&test.ctx);
}

#[test]
fn mixed_mechanism_copy_blits() {
    let test = TestContext::new();
    let size = Size2D::new(8, 8);
    let mut source = surface(&test, Mechanism::Basic, size);
    let mut destination = surface(&test, Mechanism::SharedTexture, size);
    paint(&test, &mut source, GREEN);

    let blits = test.soft.blit_count();
    source.producer_read_acquire(&test.ctx).unwrap();
    destination.producer_acquire(&test.ctx).unwrap();
    destination.copy_from(&test.ctx, &source).unwrap();
    source.producer_read_release(&test.ctx).unwrap();
    destination.producer_release(&test.ctx).unwrap();

    assert_eq!(test.soft.blit_count(), blits + 1);
    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, GREEN));
    source.destroy(&test.ctx);
    destination.destroy(&test.ctx);
}

#[test]
fn copy_without_blit_support_goes_through_textures() {
    let test = TestContext::with(GlFeatures::minimal(), SoftLimits::default());
    let size = Size2D::new(4, 4);
    let mut source = surface(&test, Mechanism::Basic, size);
    let mut destination = surface(&test, Mechanism::Basic, size);
    paint(&test, &mut source, RED);

    source.producer_read_acquire(&test.ctx).unwrap();
    destination.producer_acquire(&test.ctx).unwrap();
    destination.copy_from(&test.ctx, &source).unwrap();
    source.producer_read_release(&test.ctx).unwrap();
    destination.producer_release(&test.ctx).unwrap();

    let pixels = test.read_framebuffer(destination.framebuffer(), size);
    assert!(all_pixels_are(&pixels, RED));
    source.destroy(&test.ctx);
    destination.destroy(&test.ctx);
}

#[test]
#[should_panic(expected = "differently sized")]
fn copy_between_sizes_is_a_bug() {
    let test = TestContext::new();
    let mut source = surface(&test, Mechanism::Basic, Size2D::new(4, 4));
    let mut destination = surface(&test, Mechanism::Basic, Size2D::new(8, 8));
    source.producer_read_acquire(&test.ctx).unwrap();
    destination.producer_acquire(&test.ctx).unwrap();
    let _ = destination.copy_from(&test.ctx, &source);
}

#[test]
fn basic_surfaces_have_no_transfer_descriptor() {
    let test = TestContext::new();
    let mut basic = surface(&test, Mechanism::Basic, Size2D::new(4, 4));
    match basic.to_transfer_descriptor() {
        Err(SurfaceError::Unsupported { mechanism, .. }) => assert_eq!(mechanism, Mechanism::Basic),
        other => panic!("unexpected {:?}", other),
    }
    basic.destroy(&test.ctx);
}

#[test]
fn shared_texture_descriptor_names_the_share_group() {
    let test = TestContext::new();
    let size = Size2D::new(16, 8);
    let mut shared = surface(&test, Mechanism::SharedTexture, size);
    match shared.to_transfer_descriptor().unwrap() {
        TransferDescriptor::SharedTexture { share_group, texture, size: described, .. } => {
            assert_eq!(share_group, test.ctx.share_group());
            assert_ne!(texture, 0);
            assert_eq!(described, size);
        }
        other => panic!("unexpected {:?}", other),
    }
    shared.destroy(&test.ctx);
}

#[test]
fn release_fences_when_it_can() {
    let test = TestContext::new();
    let mut shared = surface(&test, Mechanism::SharedTexture, Size2D::new(4, 4));
    let finishes = test.soft.finish_count();
    paint(&test, &mut shared, RED);
    assert_eq!(test.soft.finish_count(), finishes);
    shared.destroy(&test.ctx);
}

#[test]
fn failed_fence_falls_back_to_finish() {
    let test = TestContext::new();
    test.soft.set_fail_fences(true);
    let mut shared = surface(&test, Mechanism::SharedTexture, Size2D::new(4, 4));
    let finishes = test.soft.finish_count();
    paint(&test, &mut shared, RED);
    assert_eq!(test.soft.finish_count(), finishes + 1);
    shared.destroy(&test.ctx);
}

#[test]
fn drivers_without_sync_finish() {
    let features = GlFeatures { sync: false, ..GlFeatures::all() };
    let test = TestContext::with(features, SoftLimits::default());
    let mut shared = surface(&test, Mechanism::SharedTexture, Size2D::new(4, 4));
    let finishes = test.soft.finish_count();
    paint(&test, &mut shared, RED);
    assert_eq!(test.soft.finish_count(), finishes + 1);
    shared.destroy(&test.ctx);
}

#[test]
fn lock_follows_write_access() {
    let test = TestContext::new();
    let mut shared = surface(&test, Mechanism::Basic, Size2D::new(4, 4));
    shared.producer_acquire(&test.ctx).unwrap();
    shared.lock_prod(&test.ctx);
    assert!(shared.is_locked());
    assert_eq!(test.ctx.locked_surface(), Some(shared.id()));

    shared.producer_release(&test.ctx).unwrap();
    assert!(!shared.is_locked());
    assert_eq!(test.ctx.locked_surface(), None);
    shared.destroy(&test.ctx);
}

#[test]
#[should_panic(expected = "lock_prod")]
fn locking_an_idle_surface_is_a_bug() {
    let test = TestContext::new();
    let mut shared = surface(&test, Mechanism::Basic, Size2D::new(4, 4));
    shared.lock_prod(&test.ctx);
}

#[test]
#[should_panic(expected = "foreign GL context")]
fn surfaces_refuse_other_contexts() {
    let test = TestContext::new();
    let other = test.shared();
    let mut shared = surface(&test, Mechanism::Basic, Size2D::new(4, 4));
    let _ = shared.producer_acquire(&other.ctx);
}

#[test]
fn lost_contexts_fail_softly() {
    let test = TestContext::new();
    let mut shared = surface(&test, Mechanism::SharedTexture, Size2D::new(4, 4));
    test.ctx.mark_lost();

    assert_eq!(shared.producer_acquire(&test.ctx), Err(SurfaceError::ContextLost));
    assert_eq!(shared.state(), AccessState::Idle);
    let live = test.soft.live_object_count();
    shared.destroy(&test.ctx);
    assert_eq!(test.soft.live_object_count(), live);

    let result = SharedSurface::new(&test.ctx,
                                    Mechanism::Basic,
                                    &BackendInfo::Placeholder,
                                    Size2D::new(4, 4),
                                    true,
                                    &SurfaceConfig::default(),
                                    None);
    assert_eq!(result.err(), Some(SurfaceError::ContextLost));
}

#[test]
fn oversized_surfaces_are_refused() {
    let test = TestContext::with_max_size(64);
    let result = SharedSurface::new(&test.ctx,
                                    Mechanism::Basic,
                                    &BackendInfo::Placeholder,
                                    Size2D::new(128, 8),
                                    true,
                                    &SurfaceConfig::default(),
                                    None);
    assert_eq!(result.err(), Some(SurfaceError::TooLarge { width: 128, height: 8, max: 64 }));
}

#[test]
fn read_pixels_reads_the_surface_not_the_binding() {
    let test = TestContext::new();
    let size = Size2D::new(2, 2);
    let mut shared = surface(&test, Mechanism::Basic, size);
    paint(&test, &mut shared, GREEN);

    let mut pixels = vec![0; 16];
    shared.read_pixels(&test.ctx, 0, 0, 2, 2, gl::RGBA, gl::UNSIGNED_BYTE, &mut pixels).unwrap();
    assert!(all_pixels_are(&pixels, GREEN));
    assert_eq!(test.ctx.get_integer(gl::READ_FRAMEBUFFER_BINDING), 0);
    shared.destroy(&test.ctx);
}
