//! Fixed-point 8x8 inverse DCT.

/// Zig-zag scan order of an 8x8 block.
pub const ZIGZAG_ORDER: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

// T[u][x] = round(4096 * 0.5 * c(u) * cos((2x+1) u pi / 16))
const COS_TABLE: [[i32; 8]; 8] = [
    [1448, 1448, 1448, 1448, 1448, 1448, 1448, 1448],
    [2009, 1703, 1138, 400, -400, -1138, -1703, -2009],
    [1892, 784, -784, -1892, -1892, -784, 784, 1892],
    [1703, -400, -2009, -1138, 1138, 2009, 400, -1703],
    [1448, -1448, -1448, 1448, 1448, -1448, -1448, 1448],
    [1138, -2009, 400, 1703, -1703, -400, 2009, -1138],
    [784, -1892, 1892, -784, -784, 1892, -1892, 784],
    [400, -1138, 1703, -2009, 2009, -1703, 1138, -400],
];

/// Inverse-transform a dequantized coefficient block into level-shifted
/// 8-bit samples. Rows first (3 fractional bits kept), then columns.
pub fn idct_8x8(block: &[i32; 64], out: &mut [u8; 64]) {
    let mut tmp = [0i32; 64];
    for y in 0..8 {
        for x in 0..8 {
            let mut sum = 0i64;
            for u in 0..8 {
                sum += block[y * 8 + u] as i64 * COS_TABLE[u][x] as i64;
            }
            tmp[y * 8 + x] = ((sum + 256) >> 9) as i32;
        }
    }
    for y in 0..8 {
        for x in 0..8 {
            let mut sum = 0i64;
            for v in 0..8 {
                sum += tmp[v * 8 + x] as i64 * COS_TABLE[v][y] as i64;
            }
            let val = ((sum + 16384) >> 15) as i32 + 128;
            out[y * 8 + x] = val.clamp(0, 255) as u8;
        }
    }
}
