use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, GrayImage, RgbImage};
use tch::{Device, Kind, Tensor};

/// Loads the initial image as RGB, resized to the generation resolution.
pub fn load_init_image(path: &Path, width: u32, height: u32) -> Result<RgbImage> {
    let image = image::open(path)
        .with_context(|| format!("reading init image {}", path.display()))?;
    Ok(image::imageops::resize(
        &image.to_rgb8(),
        width,
        height,
        FilterType::Triangle,
    ))
}

/// Loads the inpainting mask as grayscale at latent resolution.
pub fn load_mask(path: &Path, width: u32, height: u32) -> Result<GrayImage> {
    let mask = image::open(path)
        .with_context(|| format!("reading mask {}", path.display()))?;
    Ok(image::imageops::resize(
        &mask.to_luma8(),
        width,
        height,
        FilterType::Triangle,
    ))
}

/// `[0, 255]` RGB to the `[-1, 1]` NCHW float layout the VAE encoder expects.
pub(crate) fn image_to_tensor(image: &RgbImage, device: Device) -> Tensor {
    let (width, height) = image.dimensions();
    let pixels = Tensor::from_slice(image.as_raw())
        .view((height as i64, width as i64, 3))
        .permute([2, 0, 1])
        .unsqueeze(0)
        .to_kind(Kind::Float)
        .to_device(device);
    pixels / 255. * 2. - 1.
}

/// Grayscale mask at latent resolution to the keep-region weight tensor:
/// white mask pixels are regenerated, black pixels keep the original.
pub(crate) fn mask_to_keep_tensor(mask: &GrayImage, device: Device) -> Tensor {
    let (width, height) = mask.dimensions();
    let mask = Tensor::from_slice(mask.as_raw())
        .view((1, 1, height as i64, width as i64))
        .to_kind(Kind::Float)
        .to_device(device);
    mask / 255. * -1. + 1.
}

/// Decoded VAE output (NCHW, `[-1, 1]`) to an 8-bit RGB image.
pub(crate) fn tensor_to_image(tensor: &Tensor) -> Result<RgbImage> {
    let image = ((tensor / 2. + 0.5).clamp(0., 1.) * 255.).to_kind(Kind::Uint8);
    let image = image.squeeze_dim(0).permute([1, 2, 0]).contiguous();
    let (height, width, _channels) = image.size3()?;
    let data = Vec::<u8>::try_from(&image.flatten(0, -1))?;
    RgbImage::from_raw(width as u32, height as u32, data)
        .context("image buffer has invalid capacity")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_image_is_resized_to_the_requested_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.png");
        RgbImage::new(64, 48).save(&path).unwrap();

        let image = load_init_image(&path, 512, 512).unwrap();
        assert_eq!(image.dimensions(), (512, 512));
    }

    #[test]
    fn missing_init_image_fails_with_the_path() {
        let err = load_init_image(Path::new("no-such-image.png"), 512, 512)
            .unwrap_err()
            .to_string();
        assert!(err.contains("no-such-image.png"), "unexpected error: {err}");
    }

    #[test]
    fn mask_is_loaded_as_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        RgbImage::new(512, 512).save(&path).unwrap();

        let mask = load_mask(&path, 64, 64).unwrap();
        assert_eq!(mask.dimensions(), (64, 64));
    }
}
