//! Image and mask decoding.
//!
//! Bead images become `f64` intensity grids; masks are any image where
//! drawn pixels are non-black and not fully transparent.

use std::path::Path;

use image::DynamicImage;
use ndarray::Array2;
use tfm_pipeline::{GridShape, Mask, MaskRole, MaskSet};

use crate::error::CliError;

fn open(path: &Path) -> Result<DynamicImage, CliError> {
    image::open(path).map_err(|source| match source {
        image::ImageError::IoError(source) => CliError::Read {
            path: path.to_path_buf(),
            source,
        },
        source => CliError::Image {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Gray values of `image` at 16 bit depth, indexed `[row, col]`.
pub fn intensities(image: &DynamicImage) -> Array2<f64> {
    let gray = image.to_luma16();
    let (width, height) = gray.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(r, c)| {
        #[allow(clippy::cast_possible_truncation)]
        let pixel = gray.get_pixel(c as u32, r as u32);
        f64::from(pixel.0[0])
    })
}

/// Pixels that are neither black nor fully transparent.
pub fn mask_of(image: &DynamicImage) -> Mask {
    let gray = image.to_luma_alpha8();
    let (width, height) = gray.dimensions();
    Mask::new(Array2::from_shape_fn(
        (height as usize, width as usize),
        |(r, c)| {
            #[allow(clippy::cast_possible_truncation)]
            let [luma, alpha] = gray.get_pixel(c as u32, r as u32).0;
            luma > 0 && alpha > 0
        },
    ))
}

/// Load a bead image.
pub fn load_image(path: &Path) -> Result<Array2<f64>, CliError> {
    let image = intensities(&open(path)?);
    tracing::debug!(path = %path.display(), shape = %GridShape::of(&image), "loaded image");
    Ok(image)
}

/// Load the masks of one frame. Every mask must match `shape`, the
/// shape of the bead images.
pub fn load_masks<'a>(
    files: impl IntoIterator<Item = (MaskRole, &'a Path)>,
    shape: GridShape,
) -> Result<MaskSet, CliError> {
    let mut masks = MaskSet::new();
    for (role, path) in files {
        let mask = mask_of(&open(path)?);
        if mask.shape() != shape {
            return Err(CliError::MaskShape {
                path: path.to_path_buf(),
                expected: shape,
                found: mask.shape(),
            });
        }
        tracing::debug!(path = %path.display(), %role, pixels = mask.count(), "loaded mask");
        masks.insert(role, mask);
    }
    Ok(masks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, ImageBuffer, Luma, LumaA, Rgba, RgbaImage};

    use super::*;

    #[test]
    fn intensities_are_row_major() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(2, 0, Luma([255]));
        gray.put_pixel(0, 1, Luma([1]));
        let values = intensities(&DynamicImage::ImageLuma8(gray));
        assert_eq!(values.dim(), (2, 3));
        assert!((values[[0, 2]] - 65535.0).abs() < f64::EPSILON);
        assert!((values[[1, 0]] - 257.0).abs() < f64::EPSILON);
        assert!(values[[0, 0]].abs() < f64::EPSILON);
    }

    #[test]
    fn transparent_and_black_pixels_are_unset() {
        let mut rgba = RgbaImage::new(2, 2);
        rgba.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        rgba.put_pixel(1, 0, Rgba([255, 255, 255, 0]));
        rgba.put_pixel(0, 1, Rgba([0, 0, 0, 255]));
        rgba.put_pixel(1, 1, Rgba([10, 10, 10, 128]));
        let mask = mask_of(&DynamicImage::ImageRgba8(rgba));
        assert!(mask.get(0, 0));
        assert!(!mask.get(0, 1));
        assert!(!mask.get(1, 0));
        assert!(mask.get(1, 1));
    }

    #[test]
    fn masks_must_match_the_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("01fem_area.png");
        let image: ImageBuffer<LumaA<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 3, LumaA([255, 255]));
        image.save(&path).unwrap();

        let masks = load_masks([(MaskRole::FemDomain, path.as_path())], GridShape::new(3, 4)).unwrap();
        assert_eq!(masks.get(MaskRole::FemDomain).unwrap().count(), 12);

        assert!(matches!(
            load_masks([(MaskRole::FemDomain, path.as_path())], GridShape::new(4, 4)),
            Err(CliError::MaskShape { .. })
        ));
    }
}
