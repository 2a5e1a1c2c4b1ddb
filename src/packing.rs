//! Bit-exact scalar codecs used on the wire.
//!
//! Plain scalars travel little-endian and are packed with the standard
//! `to_le_bytes`/`from_le_bytes` at the call site. This module carries the
//! two codecs that need real work: the half-float conversion used by log
//! variables stored as `float16_t`, and the 32-bit compressed quaternion
//! used by the full-state setpoint.

/// Convert a `f32` to its half-float bit pattern.
///
/// Round-to-nearest, with ties resolved by adding `0x1000` before the
/// mantissa shift. NaN and infinity are preserved, values too large for a
/// half become infinity and values too small collapse to signed zero.
pub fn pack_f16(value: f32) -> u16 {
    let fbits = value.to_bits();
    let sign = ((fbits >> 16) & 0x8000) as u16;
    let val = (fbits & 0x7fff_ffff).wrapping_add(0x1000);

    if val >= 0x4780_0000 {
        // would round to or beyond the half-float range
        if (fbits & 0x7fff_ffff) >= 0x4780_0000 {
            if val < 0x7f80_0000 {
                return sign | 0x7c00;
            }
            return sign | 0x7c00 | ((fbits & 0x007f_ffff) >> 13) as u16;
        }
        return sign | 0x7bff;
    }
    if val >= 0x3880_0000 {
        return sign | ((val - 0x3800_0000) >> 13) as u16;
    }
    if val < 0x3300_0000 {
        return sign;
    }

    // subnormal half: shift the mantissa down to the denormal ladder
    let exp = (fbits & 0x7fff_ffff) >> 23;
    let mut n = (fbits & 0x007f_ffff) | 0x0080_0000;
    n += 0x0080_0000 >> (exp - 102);
    n >>= 126 - exp;
    n as u16 | sign
}

/// Convert a half-float bit pattern to a `f32`.
pub fn unpack_f16(hbits: u16) -> f32 {
    let hbits = hbits as u32;
    let mut mant = hbits & 0x03ff;
    let mut exp = hbits & 0x7c00;

    if exp == 0x7c00 {
        // NaN/Inf
        exp = 0x3fc00;
    } else if exp != 0 {
        exp += 0x1c000;
        if mant == 0 && exp > 0x1c400 {
            return f32::from_bits(((hbits & 0x8000) << 16) | (exp << 13) | 0x3ff);
        }
    } else if mant != 0 {
        // subnormal: renormalize
        exp = 0x1c400;
        loop {
            mant <<= 1;
            exp -= 0x400;
            if mant & 0x400 != 0 {
                break;
            }
        }
        mant &= 0x3ff;
    }

    f32::from_bits(((hbits & 0x8000) << 16) | ((exp | mant) << 13))
}

/// Half-float from its two little-endian wire bytes.
pub fn unpack_f16_bytes(bytes: [u8; 2]) -> f32 {
    unpack_f16(u16::from_le_bytes(bytes))
}

// 1/sqrt(2) is the largest possible value of the second-largest element
// in a unit quaternion.
const SMALL_MAX: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Compress a unit quaternion `[x, y, z, w]` into 32 bits.
///
/// The three smallest components are sent as `(sign, 9-bit magnitude)`;
/// the index of the largest lands in the top two bits. Since `-q` encodes
/// the same rotation as `q`, the quaternion is negated when the largest
/// component is negative so its sign never needs to travel.
///
/// The input must be normalized; the encoding is undefined otherwise.
pub fn quatcompress(q: [f32; 4]) -> u32 {
    let mut i_largest = 0;
    for i in 1..4 {
        if q[i].abs() > q[i_largest].abs() {
            i_largest = i;
        }
    }
    let negate = q[i_largest] < 0.0;

    let mut comp = i_largest as u32;
    for (i, &value) in q.iter().enumerate() {
        if i != i_largest {
            let negbit = (value < 0.0) ^ negate;
            let mag = (((1 << 9) - 1) as f32 * (value.abs() / SMALL_MAX) + 0.5) as u32;
            comp = (comp << 10) | ((negbit as u32) << 9) | mag;
        }
    }

    comp
}

/// Decompress a quaternion from its 32-bit compressed representation.
///
/// The dropped component is rebuilt as the non-negative root of
/// `1 - Σ qᵢ²`.
pub fn quatdecompress(comp: u32) -> [f32; 4] {
    let mask = (1u32 << 9) - 1;
    let i_largest = (comp >> 30) as usize;

    let mut comp = comp;
    let mut q = [0.0f32; 4];
    let mut sum_squares = 0.0f32;
    for i in (0..4).rev() {
        if i != i_largest {
            let mag = comp & mask;
            let negbit = (comp >> 9) & 0x1;
            comp >>= 10;
            q[i] = SMALL_MAX * mag as f32 / mask as f32;
            if negbit == 1 {
                q[i] = -q[i];
            }
            sum_squares += q[i] * q[i];
        }
    }
    q[i_largest] = (1.0 - sum_squares).max(0.0).sqrt();

    q
}
