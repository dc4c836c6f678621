//! Floyd–Steinberg error-diffusion quantization onto a fixed palette

use image::RgbaImage;

use super::palette::Palette;

/// Palette-indexed raster: one palette index per pixel, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    palette: Vec<u8>,
}

impl IndexedImage {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Flat RGB color table the indices refer to.
    pub fn palette(&self) -> &[u8] {
        &self.palette
    }

    pub fn color_count(&self) -> usize {
        self.palette.len() / 3
    }

    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Maps every pixel of `image` to `palette`, diffusing the quantization
/// error to the right (7/16), lower-left (3/16), lower (5/16) and
/// lower-right (1/16) neighbours. Alpha is ignored.
pub fn quantize(image: &RgbaImage, palette: Palette<'_>) -> IndexedImage {
    let (width, height) = image.dimensions();
    let w = width as usize;
    let mut pixels = Vec::with_capacity(w * height as usize);

    // Error rows carry 16x the error, padded by one column on each side.
    let mut current = vec![[0i32; 3]; w + 2];
    let mut next = vec![[0i32; 3]; w + 2];

    for y in 0..height {
        for x in 0..width {
            let px = image.get_pixel(x, y).0;
            let carried = current[x as usize + 1];
            let mut wanted = [0i32; 3];
            for c in 0..3 {
                wanted[c] = (i32::from(px[c]) + carried[c] / 16).clamp(0, 255);
            }

            let idx = palette.nearest(wanted);
            pixels.push(idx);

            let chosen = palette.colors()[idx as usize];
            let col = x as usize + 1;
            for c in 0..3 {
                let err = wanted[c] - i32::from(chosen[c]);
                current[col + 1][c] += err * 7;
                next[col - 1][c] += err * 3;
                next[col][c] += err * 5;
                next[col + 1][c] += err;
            }
        }
        std::mem::swap(&mut current, &mut next);
        next.iter_mut().for_each(|e| *e = [0; 3]);
    }

    IndexedImage {
        width,
        height,
        pixels,
        palette: palette.to_rgb_bytes(),
    }
}
