// Copyright 2013 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Pixel conversions for readback.

/// Drops the alpha byte of every RGBA pixel.
pub fn convert_rgb32_to_rgb24(buffer: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(buffer.len() / 4 * 3);
    for pixel in buffer.chunks_exact(4) {
        result.extend_from_slice(&pixel[..3]);
    }
    result
}

/// RGBA <-> BGRA, in place.
pub fn swap_red_blue(buffer: &mut [u8]) {
    for pixel in buffer.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

/// Reverses the order of rows of `stride` bytes each.
pub fn flip_rows(buffer: &mut [u8], stride: usize) {
    if stride == 0 {
        return;
    }
    let rows = buffer.len() / stride;
    for row in 0..rows / 2 {
        let (top, bottom) = buffer.split_at_mut((rows - row - 1) * stride);
        top[row * stride..(row + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}

pub fn premultiply(buffer: &mut [u8]) {
    for pixel in buffer.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u32 * alpha + 127) / 255) as u8;
        }
    }
}

pub fn unpremultiply(buffer: &mut [u8]) {
    for pixel in buffer.chunks_exact_mut(4) {
        let alpha = pixel[3] as u32;
        if alpha == 0 {
            continue;
        }
        for channel in &mut pixel[..3] {
            *channel = ((*channel as u32 * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
}
