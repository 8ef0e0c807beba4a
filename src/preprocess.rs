//! Image Preprocessing
//!
//! Decodes raw upload bytes and turns them into the fixed-size tensor the
//! classifier consumes: RGB, 224x224, channel values scaled to `[0, 1]`,
//! batch of one in `[N, C, H, W]` layout.

use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::utils::error::{DiagnosisError, Result};

/// Side length of the square model input
pub const INPUT_SIZE: u32 = 224;

/// Number of color channels fed to the model
pub const CHANNELS: usize = 3;

/// Largest accepted square input side
pub const MAX_INPUT_SIZE: u32 = 4096;

/// Bicubic resampling, matching the training-time resize
pub const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Decode raw bytes into an image, whatever the container format
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(DiagnosisError::InvalidImage("empty image buffer".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| DiagnosisError::InvalidImage(e.to_string()))
}

/// Decode raw bytes straight into an 8-bit RGB buffer
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    Ok(decode_image(bytes)?.to_rgb8())
}

/// Preprocessed model input: `[1, 3, size, size]` values in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    size: usize,
}

impl ImageTensor {
    /// All-zero (black) input, used to check a model's output width
    pub fn zeros(size: usize) -> Self {
        Self {
            data: vec![0.0; CHANNELS * size * size],
            size,
        }
    }

    /// Square side length
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tensor shape as `[batch, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        [1, CHANNELS, self.size, self.size]
    }

    /// Flat CHW values
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Converts decoded images into model input tensors
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    /// Target square resolution
    pub image_size: u32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            image_size: INPUT_SIZE,
        }
    }
}

impl ImagePreprocessor {
    pub fn new(image_size: u32) -> Self {
        Self { image_size }
    }

    /// Decode and preprocess raw image bytes
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<ImageTensor> {
        let image = decode_image(bytes)?;
        Ok(self.preprocess(&image))
    }

    /// Resize to the target square and scale to `[0, 1]` in CHW layout
    pub fn preprocess(&self, image: &DynamicImage) -> ImageTensor {
        let resized = image
            .resize_exact(self.image_size, self.image_size, RESIZE_FILTER)
            .to_rgb8();
        let size = self.image_size as usize;
        let num_pixels = size * size;

        let mut data = vec![0.0f32; CHANNELS * num_pixels];
        for (i, pixel) in resized.pixels().enumerate() {
            // all R values, then all G values, then all B values
            data[i] = pixel[0] as f32 / 255.0;
            data[num_pixels + i] = pixel[1] as f32 / 255.0;
            data[2 * num_pixels + i] = pixel[2] as f32 / 255.0;
        }

        ImageTensor { data, size }
    }
}
