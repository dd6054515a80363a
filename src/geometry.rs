// Copyright 2014 The Servo Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Size arithmetic for drawing buffers.

use euclid::default::Size2D;

/// Drawing buffers are never smaller than one pixel in either dimension.
pub fn clamp_to_min(size: Size2D<i32>) -> Size2D<i32> {
    Size2D::new(size.width.max(1), size.height.max(1))
}

pub fn max_dimension(size: Size2D<i32>) -> i32 {
    size.width.max(size.height)
}

pub fn fits_within(size: Size2D<i32>, max: i32) -> bool {
    size.width > 0 && size.height > 0 && max_dimension(size) <= max
}

/// Halves both dimensions. Returns `None` once both have reached zero, otherwise any
/// zero dimension is bumped back to one.
pub fn halve(size: Size2D<i32>) -> Option<Size2D<i32>> {
    let width = size.width / 2;
    let height = size.height / 2;
    if width == 0 && height == 0 {
        return None;
    }
    Some(clamp_to_min(Size2D::new(width, height)))
}

/// The sizes tried, in order, when allocating a buffer of `requested` size.
pub fn halving_sequence(requested: Size2D<i32>) -> HalvingSequence {
    HalvingSequence {
        next: Some(clamp_to_min(requested)),
    }
}

pub struct HalvingSequence {
    next: Option<Size2D<i32>>,
}

impl Iterator for HalvingSequence {
    type Item = Size2D<i32>;

    fn next(&mut self) -> Option<Size2D<i32>> {
        let current = self.next?;
        self.next = halve(current);
        Some(current)
    }
}

/// Bytes needed for a tightly packed 32-bit-per-pixel image.
pub fn rgba_byte_len(size: Size2D<i32>) -> usize {
    size.width.max(0) as usize * size.height.max(0) as usize * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_degenerate_sizes() {
        assert_eq!(clamp_to_min(Size2D::new(0, 0)), Size2D::new(1, 1));
        assert_eq!(clamp_to_min(Size2D::new(-4, 7)), Size2D::new(1, 7));
    }

    #[test]
    fn halving_terminates() {
        let sizes: Vec<_> = halving_sequence(Size2D::new(1000, 3)).collect();
        assert_eq!(sizes.first(), Some(&Size2D::new(1000, 3)));
        assert_eq!(sizes.last(), Some(&Size2D::new(1, 1)));
        // 1000 -> 500 -> ... -> 1 is ten halvings plus the original request.
        assert_eq!(sizes.len(), 10);
        assert!(sizes.contains(&Size2D::new(500, 1)));
    }

    #[test]
    fn halving_is_bounded_by_log2() {
        let sizes = halving_sequence(Size2D::new(i32::MAX, i32::MAX)).count();
        assert!(sizes <= 32);
    }

    #[test]
    fn fits_within_max() {
        assert!(fits_within(Size2D::new(256, 12), 256));
        assert!(!fits_within(Size2D::new(257, 12), 256));
        assert!(!fits_within(Size2D::new(0, 12), 256));
    }
}
