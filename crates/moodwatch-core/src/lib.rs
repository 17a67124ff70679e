//! moodwatch-core: facial emotion detection.
//!
//! Uses SCRFD for face detection and a FER-style 48x48 classifier for
//! emotion recognition, both running via ONNX Runtime on the CPU.

pub mod classifier;
pub mod detector;
pub mod frame;
pub mod types;

pub use classifier::{ClassifierError, EmotionClassifier};
pub use detector::{DetectorError, FaceDetector};
pub use frame::{FrameError, TensorLayout};
pub use types::{EmotionLabel, FaceRegion};

use image::GrayImage;
use ndarray::Array4;
use std::path::PathBuf;

/// Finds the face to classify in a grayscale frame.
pub trait FaceLocator {
    fn locate(&mut self, gray: &GrayImage) -> Result<Option<FaceRegion>, DetectorError>;
}

/// Maps a preprocessed 48x48 face tensor to an emotion label.
pub trait EmotionModel {
    /// Input layout the model expects.
    fn layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    fn classify(&mut self, face: &Array4<f32>) -> Result<EmotionLabel, ClassifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    InvalidImage(#[from] FrameError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Outcome of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analysis {
    pub label: EmotionLabel,
    /// The face that was classified, if any.
    pub face: Option<FaceRegion>,
}

/// Decode `bytes`, locate a face and classify it.
///
/// A frame without a face is not an error: it yields [`EmotionLabel::NoFace`].
pub fn analyze_frame(
    bytes: &[u8],
    locator: &mut dyn FaceLocator,
    model: &mut dyn EmotionModel,
) -> Result<Analysis, AnalysisError> {
    let gray = frame::decode_grayscale(bytes)?;

    let Some(face) = locator.locate(&gray)? else {
        return Ok(Analysis { label: EmotionLabel::NoFace, face: None });
    };

    let Some(tensor) = frame::face_tensor(&gray, &face, model.layout()) else {
        tracing::debug!(?face, "face region lies outside the frame");
        return Ok(Analysis { label: EmotionLabel::NoFace, face: None });
    };

    let label = model.classify(&tensor)?;
    Ok(Analysis { label, face: Some(face) })
}

/// Default model directory: `$XDG_DATA_HOME/moodwatch/models`,
/// falling back to `~/.local/share/moodwatch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("moodwatch")
        .join("models")
}
