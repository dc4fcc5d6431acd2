// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Implements FloorLog2(x), which is defined to be the floor of the base 2
/// logarithm of the input x.
///
/// The input x will always be an integer, and will always be greater than or equal to 1.
/// This function extracts the location of the most significant bit in x.
pub fn floor_log2(x: u32) -> u32 {
    assert!(x > 0);
    31 - x.leading_zeros()
}

/// Implements 5.9.3. Get relative distance function
pub fn get_relative_dist(enable_order_hint: bool, order_hint_bits: u32, a: i32, b: i32) -> i32 {
    if !enable_order_hint || order_hint_bits == 0 {
        0
    } else {
        let diff = a - b;
        let m = 1 << (order_hint_bits - 1);
        (diff & (m - 1)) - (diff & m)
    }
}

/// Smallest `k` such that `blk_size << k` is greater than or equal to `target`.
pub fn tile_log2(blk_size: u32, target: u32) -> u32 {
    let mut k = 0;

    while (blk_size << k) < target {
        k += 1;
    }

    k
}

/// 5.9.29
pub fn inverse_recenter(r: i32, v: i32) -> i32 {
    if v > 2 * r {
        v
    } else if v & 1 != 0 {
        r - ((v + 1) >> 1)
    } else {
        r + (v >> 1)
    }
}

/// Inverse of [`inverse_recenter`], used when coding a value against a reference.
pub fn recenter(r: i32, v: i32) -> i32 {
    if v > 2 * r {
        v
    } else if v >= r {
        (v - r) << 1
    } else {
        ((r - v) << 1) - 1
    }
}

/// Implements 5.9.27 on an already extracted subexponential code `sub_exp`.
pub fn decode_unsigned_subexp_with_ref(sub_exp: i32, mx: i32, r: i32) -> i32 {
    if (r << 1) <= mx {
        inverse_recenter(r, sub_exp)
    } else {
        mx - 1 - inverse_recenter(mx - 1 - r, sub_exp)
    }
}

/// Implements 5.9.26 on an already extracted subexponential code `sub_exp`.
pub fn decode_signed_subexp_with_ref(sub_exp: i32, low: i32, high: i32, r: i32) -> i32 {
    decode_unsigned_subexp_with_ref(sub_exp, high - low, r - low) + low
}

/// Returns the subexponential code for `x` in `[0, mx)` coded against the reference `r`.
pub fn encode_unsigned_subexp_with_ref(x: i32, mx: i32, r: i32) -> i32 {
    if (r << 1) <= mx {
        recenter(r, x)
    } else {
        recenter(mx - 1 - r, mx - 1 - x)
    }
}

/// Returns the subexponential code for `x` in `[low, high)` coded against the reference `r`.
pub fn encode_signed_subexp_with_ref(x: i32, low: i32, high: i32, r: i32) -> i32 {
    encode_unsigned_subexp_with_ref(x - low, high - low, r - low)
}
