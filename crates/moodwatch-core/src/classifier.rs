//! Facial emotion classifier via ONNX Runtime.
//!
//! Takes a normalized 48x48 single-channel face crop and returns the
//! arg-max label over the seven emotion classes. No confidence threshold
//! is applied.

use crate::frame::TensorLayout;
use crate::types::EmotionLabel;
use crate::EmotionModel;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMOTION_CLASS_COUNT: usize = 7;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("classifier model not found: {0}")]
    ModelNotFound(String),
    #[error("classifier inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX emotion classifier (FER-style 48x48 grayscale input, 7 scores out).
pub struct EmotionClassifier {
    session: Session,
    layout: TensorLayout,
}

impl EmotionClassifier {
    /// Load the classifier model. `layout` must match the model's input.
    pub fn load(model_path: &Path, layout: TensorLayout) -> Result<Self, ClassifierError> {
        if !model_path.exists() {
            return Err(ClassifierError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            ?layout,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded emotion classifier"
        );

        Ok(Self { session, layout })
    }
}

impl EmotionModel for EmotionClassifier {
    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn classify(&mut self, face: &Array4<f32>) -> Result<EmotionLabel, ClassifierError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(face.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e}")))?;

        if scores.len() != EMOTION_CLASS_COUNT {
            return Err(ClassifierError::InferenceFailed(format!(
                "expected {EMOTION_CLASS_COUNT} class scores, got {}",
                scores.len()
            )));
        }

        let index = argmax(scores)
            .ok_or_else(|| ClassifierError::InferenceFailed("scores contain NaN".into()))?;
        tracing::trace!(?scores, index, "emotion scores");

        EmotionLabel::from_class_index(index)
            .ok_or_else(|| {
                ClassifierError::InferenceFailed(format!("class index {index} out of range"))
            })
    }
}

/// Index of the largest score; ties resolve to the lowest index.
/// `None` for empty input or any NaN.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if scores.iter().any(|s| s.is_nan()) {
        return None;
    }
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}
