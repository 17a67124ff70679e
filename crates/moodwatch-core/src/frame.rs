//! Frame decoding and face-crop preprocessing for the emotion classifier.

use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;

/// Side length of the square classifier input.
pub const FACE_INPUT_SIZE: u32 = 48;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("undecodable frame: {0}")]
    Decode(#[from] image::ImageError),
}

/// Memory layout of the classifier's input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
    /// `[1, 48, 48, 1]`: batch, height, width, channel (Keras exports).
    #[default]
    Nhwc,
    /// `[1, 1, 48, 48]`: batch, channel, height, width.
    Nchw,
}

impl std::str::FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nhwc" => Ok(TensorLayout::Nhwc),
            "nchw" => Ok(TensorLayout::Nchw),
            other => Err(format!("unknown tensor layout '{other}' (expected nhwc or nchw)")),
        }
    }
}

/// Decode an encoded image (PNG, JPEG, ...) into single-channel luma.
pub fn decode_grayscale(bytes: &[u8]) -> Result<GrayImage, FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.to_luma8())
}

/// Crop the face out of `gray`, resize it to 48x48 and scale pixels to [0, 1].
///
/// Returns `None` when the region does not overlap the frame.
pub fn face_tensor(
    gray: &GrayImage,
    face: &FaceRegion,
    layout: TensorLayout,
) -> Option<Array4<f32>> {
    let (x, y, w, h) = face.clamp_to(gray.width(), gray.height())?;
    let crop = imageops::crop_imm(gray, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle);

    let size = FACE_INPUT_SIZE as usize;
    let shape = match layout {
        TensorLayout::Nhwc => (1, size, size, 1),
        TensorLayout::Nchw => (1, 1, size, size),
    };
    let mut tensor = Array4::<f32>::zeros(shape);

    for (px, py, pixel) in resized.enumerate_pixels() {
        let value = pixel.0[0] as f32 / 255.0;
        let (row, col) = (py as usize, px as usize);
        match layout {
            TensorLayout::Nhwc => tensor[[0, row, col, 0]] = value,
            TensorLayout::Nchw => tensor[[0, 0, row, col]] = value,
        }
    }

    Some(tensor)
}
