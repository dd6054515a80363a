// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CPU readback of published frames, for consumers that cannot import a surface natively.

use crate::context::GlContext;
use crate::error::SurfaceError;
use crate::framebuffer::{ScopedBindFramebuffer, ScopedFramebufferForTexture};
use crate::gl;
use crate::handle::SurfaceHandle;
use crate::platform::surface::{Mechanism, TransferDescriptor};
use crate::sync;
use crate::texturegl::Texture;
use crate::util;

use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadbackFormat {
    Rgba,
    Bgra,
    Rgb,
}

impl ReadbackFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ReadbackFormat::Rgba | ReadbackFormat::Bgra => 4,
            ReadbackFormat::Rgb => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadbackOptions {
    pub format: ReadbackFormat,
    /// Return rows top row first instead of GL's bottom row first.
    pub flip_y: bool,
    /// Return colour multiplied by alpha. Frames are converted from whichever alpha mode they
    /// were drawn with.
    pub premultiply: bool,
    /// How long to wait for the producer to let go of a keyed surface.
    pub acquire_timeout: Duration,
}

impl Default for ReadbackOptions {
    fn default() -> ReadbackOptions {
        ReadbackOptions {
            format: ReadbackFormat::Rgba,
            flip_y: false,
            premultiply: false,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Copies the frame behind `handle` into `destination`, tightly packed.
///
/// Basic surfaces are read from their staging copy and need no context. Shared textures are
/// read through `consumer`, which must be in the producer's share group.
pub fn readback(handle: &SurfaceHandle,
                consumer: Option<&GlContext>,
                destination: &mut [u8],
                options: ReadbackOptions)
                -> Result<(), SurfaceError> {
    let size = handle.size();
    let pixel_count = size.width as usize * size.height as usize;
    let needed = pixel_count * options.format.bytes_per_pixel();
    if destination.len() < needed {
        return Err(SurfaceError::BufferTooSmall { needed, got: destination.len() });
    }

    let mut rgba = vec![0; pixel_count * 4];
    match handle.mechanism() {
        Mechanism::Basic => read_staging(handle, &mut rgba)?,
        Mechanism::SharedTexture => {
            let consumer = consumer.ok_or(SurfaceError::ShareGroupMismatch)?;
            read_shared_texture(handle, consumer, &mut rgba, options.acquire_timeout)?
        }
        mechanism => {
            return Err(SurfaceError::Unsupported { mechanism, operation: "readback" });
        }
    }

    match (handle.is_premultiplied(), options.premultiply) {
        (false, true) => util::premultiply(&mut rgba),
        (true, false) => util::unpremultiply(&mut rgba),
        _ => {}
    }
    if options.flip_y {
        util::flip_rows(&mut rgba, size.width as usize * 4);
    }
    match options.format {
        ReadbackFormat::Rgba => destination[..needed].copy_from_slice(&rgba),
        ReadbackFormat::Bgra => {
            util::swap_red_blue(&mut rgba);
            destination[..needed].copy_from_slice(&rgba);
        }
        ReadbackFormat::Rgb => {
            destination[..needed].copy_from_slice(&util::convert_rgb32_to_rgb24(&rgba))
        }
    }
    Ok(())
}

fn read_staging(handle: &SurfaceHandle, rgba: &mut [u8]) -> Result<(), SurfaceError> {
    let copied = handle.with_staging(|staging| {
        if staging.len() < rgba.len() {
            return false;
        }
        rgba.copy_from_slice(&staging[..rgba.len()]);
        true
    });
    match copied {
        Some(true) => Ok(()),
        // Never released, so nothing was read back yet.
        Some(false) | None => Err(SurfaceError::Gl(gl::INVALID_OPERATION)),
    }
}

fn read_shared_texture(handle: &SurfaceHandle,
                       consumer: &GlContext,
                       rgba: &mut [u8],
                       timeout: Duration)
                       -> Result<(), SurfaceError> {
    let (share_group, texture, target, size) = match handle.to_transfer_descriptor()? {
        TransferDescriptor::SharedTexture { share_group, texture, target, size } => {
            (share_group, texture, target, size)
        }
        _ => unreachable!("shared texture surface with a foreign descriptor"),
    };
    if share_group != consumer.share_group() {
        return Err(SurfaceError::ShareGroupMismatch);
    }
    if !consumer.is_alive() {
        return Err(SurfaceError::ContextLost);
    }

    // A private clone, so the access taken here is never confused with the caller's.
    let _access = if handle.is_consumer_acquired() {
        None
    } else {
        let access = handle.clone();
        if !access.consumer_acquire(timeout) {
            sync::abort_on_timeout("a published surface's keyed mutex", timeout)
        }
        Some(access)
    };

    let gl = consumer.gl();
    if let Some(fence) = handle.release_fence() {
        match gl.client_wait_sync(fence, timeout.as_nanos() as u64) {
            gl::TIMEOUT_EXPIRED => {
                sync::abort_on_timeout("a published surface's release fence", timeout)
            }
            gl::WAIT_FAILED => {
                debug!("readback: waiting on the release fence of {:?} failed", handle);
                let error = consumer.take_error().unwrap_or(gl::INVALID_OPERATION);
                return Err(SurfaceError::Gl(error));
            }
            _ => {}
        }
    }

    let texture = Texture::wrap(texture, target, size);
    {
        let wrapper = ScopedFramebufferForTexture::new(gl, &texture);
        let _bind = ScopedBindFramebuffer::bind(gl, wrapper.framebuffer());
        gl.read_pixels(0, 0, size.width, size.height, gl::RGBA, gl::UNSIGNED_BYTE, rgba);
    }

    match consumer.take_error() {
        None => Ok(()),
        Some(error) => Err(SurfaceError::Gl(error)),
    }
}
