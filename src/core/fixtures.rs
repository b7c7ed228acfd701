use image::{ImageBuffer, Rgb, RgbImage};
use std::path::Path;

/// Red ramps along x, green along y, blue fixed.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([((x * 4) % 256) as u8, ((y * 4) % 256) as u8, 128])
    })
}

/// Same as [`gradient_image`] with the top-left pixel turned white.
pub fn near_copy_of_gradient(width: u32, height: u32) -> RgbImage {
    let mut img = gradient_image(width, height);
    img.put_pixel(0, 0, Rgb([255, 255, 255]));
    img
}

pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    ImageBuffer::from_pixel(width, height, Rgb(color))
}

pub fn write_png(path: &Path, img: &RgbImage) {
    img.save(path).unwrap();
}
