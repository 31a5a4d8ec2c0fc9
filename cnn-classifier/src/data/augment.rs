//! Random affine augmentation for training images.

use crate::framework::InputShape;
use rand::Rng;

type Matrix3 = [[f32; 3]; 3];

/// Ranges of the random transforms applied to each training image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentationPolicy {
    /// Maximum rotation in degrees, either direction.
    pub rotation_range: f32,
    /// Maximum horizontal shift as a fraction of width.
    pub width_shift_range: f32,
    /// Maximum vertical shift as a fraction of height.
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees.
    pub shear_range: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
    /// Mirror left-right with probability 0.5.
    pub horizontal_flip: bool,
    /// Mirror top-bottom with probability 0.5.
    pub vertical_flip: bool,
}

impl Default for AugmentationPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl AugmentationPolicy {
    /// The policy used for training: rotation 20, shifts 0.1, shear 0.1,
    /// zoom 0.2, both flips.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            shear_range: 0.1,
            zoom_range: 0.2,
            horizontal_flip: true,
            vertical_flip: true,
        }
    }

    /// Applies one random transform to a flattened `shape` image.
    ///
    /// Output pixels map back to input pixels through the sampled affine
    /// matrix; coordinates outside the image take the nearest edge pixel.
    pub fn apply<R: Rng>(&self, pixels: &[f32], shape: InputShape, rng: &mut R) -> Vec<f32> {
        let (h, w, c) = (shape.height, shape.width, shape.channels);
        if h == 0 || w == 0 {
            return pixels.to_vec();
        }

        let theta = symmetric(rng, self.rotation_range).to_radians();
        let tx = symmetric(rng, self.height_shift_range) * h as f32;
        let ty = symmetric(rng, self.width_shift_range) * w as f32;
        let shear = symmetric(rng, self.shear_range).to_radians();
        let (zx, zy) = if self.zoom_range > 0.0 {
            (
                rng.gen_range(1.0 - self.zoom_range..=1.0 + self.zoom_range),
                rng.gen_range(1.0 - self.zoom_range..=1.0 + self.zoom_range),
            )
        } else {
            (1.0, 1.0)
        };
        let flip_h = self.horizontal_flip && rng.gen_bool(0.5);
        let flip_v = self.vertical_flip && rng.gen_bool(0.5);

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]];
        let shear_m = [
            [1.0, -shear.sin(), 0.0],
            [0.0, shear.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let zoom = [[zx, 0.0, 0.0], [0.0, zy, 0.0], [0.0, 0.0, 1.0]];
        let m = mul(&mul(&mul(&rotation, &shift), &shear_m), &zoom);

        let center_r = (h as f32 - 1.0) / 2.0;
        let center_c = (w as f32 - 1.0) / 2.0;
        let mut out = vec![0.0; pixels.len()];

        for r in 0..h {
            for col in 0..w {
                let u = r as f32 - center_r;
                let v = col as f32 - center_c;
                let src_r = m[0][0] * u + m[0][1] * v + m[0][2] + center_r;
                let src_c = m[1][0] * u + m[1][1] * v + m[1][2] + center_c;
                let src_r = nearest(src_r, h);
                let src_c = nearest(src_c, w);

                let dst_r = if flip_v { h - 1 - r } else { r };
                let dst_c = if flip_h { w - 1 - col } else { col };

                let src = (src_r * w + src_c) * c;
                let dst = (dst_r * w + dst_c) * c;
                out[dst..dst + c].copy_from_slice(&pixels[src..src + c]);
            }
        }
        out
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

fn nearest(coord: f32, len: usize) -> usize {
    let max = (len - 1) as f32;
    coord.round().clamp(0.0, max) as usize
}

fn mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}
