//! MD5 compression function: one 64-byte block folded into the 4-word state.
//!
//! Four rounds of sixteen steps. Each step mixes three of the working registers
//! through the round's boolean function, adds a table constant and one message
//! word, rotates, and rotates the register roles. All arithmetic is mod 2^32.

use super::BLOCK_SIZE;

/// Per-step additive constants, `floor(2^32 * |sin(i + 1)|)`.
pub(crate) const K: [u32; 64] = [
    0xd76a_a478, 0xe8c7_b756, 0x2420_70db, 0xc1bd_ceee,
    0xf57c_0faf, 0x4787_c62a, 0xa830_4613, 0xfd46_9501,
    0x6980_98d8, 0x8b44_f7af, 0xffff_5bb1, 0x895c_d7be,
    0x6b90_1122, 0xfd98_7193, 0xa679_438e, 0x49b4_0821,
    0xf61e_2562, 0xc040_b340, 0x265e_5a51, 0xe9b6_c7aa,
    0xd62f_105d, 0x0244_1453, 0xd8a1_e681, 0xe7d3_fbc8,
    0x21e1_cde6, 0xc337_07d6, 0xf4d5_0d87, 0x455a_14ed,
    0xa9e3_e905, 0xfcef_a3f8, 0x676f_02d9, 0x8d2a_4c8a,
    0xfffa_3942, 0x8771_f681, 0x6d9d_6122, 0xfde5_380c,
    0xa4be_ea44, 0x4bde_cfa9, 0xf6bb_4b60, 0xbebf_bc70,
    0x289b_7ec6, 0xeaa1_27fa, 0xd4ef_3085, 0x0488_1d05,
    0xd9d4_d039, 0xe6db_99e5, 0x1fa2_7cf8, 0xc4ac_5665,
    0xf429_2244, 0x432a_ff97, 0xab94_23a7, 0xfc93_a039,
    0x655b_59c3, 0x8f0c_cc92, 0xffef_f47d, 0x8584_5dd1,
    0x6fa8_7e4f, 0xfe2c_e6e0, 0xa301_4314, 0x4e08_11a1,
    0xf753_7e82, 0xbd3a_f235, 0x2ad7_d2bb, 0xeb86_d391,
];

/// Left-rotation amounts, one row per round, cycled every four steps.
const SHIFTS: [[u32; 4]; 4] = [
    [7, 12, 17, 22],
    [5, 9, 14, 20],
    [4, 11, 16, 23],
    [6, 10, 15, 21],
];

#[inline]
fn f(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (!x & z)
}

#[inline]
fn g(x: u32, y: u32, z: u32) -> u32 {
    (x & z) | (y & !z)
}

#[inline]
fn h(x: u32, y: u32, z: u32) -> u32 {
    x ^ y ^ z
}

#[inline]
fn i(x: u32, y: u32, z: u32) -> u32 {
    y ^ (x | !z)
}

/// Transform a single block. Pure: returns the new state.
pub fn transform(state: [u32; 4], block: &[u8; BLOCK_SIZE]) -> [u32; 4] {
    let mut x = [0u32; 16];
    for (word, bytes) in x.iter_mut().zip(block.chunks_exact(4)) {
        *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    }

    let [mut a, mut b, mut c, mut d] = state;

    for step in 0..64 {
        let round = step / 16;
        let (mixed, index) = match round {
            0 => (f(b, c, d), step),
            1 => (g(b, c, d), (1 + 5 * step) % 16),
            2 => (h(b, c, d), (5 + 3 * step) % 16),
            _ => (i(b, c, d), (7 * step) % 16),
        };
        let rotated = a
            .wrapping_add(mixed)
            .wrapping_add(K[step])
            .wrapping_add(x[index])
            .rotate_left(SHIFTS[round][step % 4]);
        a = d;
        d = c;
        c = b;
        b = b.wrapping_add(rotated);
    }

    [
        state[0].wrapping_add(a),
        state[1].wrapping_add(b),
        state[2].wrapping_add(c),
        state[3].wrapping_add(d),
    ]
}

/// Fold every whole block of `data` into `state`, in order.
///
/// `data.len()` must be a multiple of [`BLOCK_SIZE`]; a trailing partial block
/// is ignored.
pub fn compress(state: &mut [u32; 4], data: &[u8]) {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        *state = transform(*state, &block);
    }
}
