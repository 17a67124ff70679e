use serde::{Deserialize, Serialize};
use std::fmt;

/// A facial emotion label, or the `NoFace` sentinel.
///
/// Variant order matches the classifier's output order, so
/// `EmotionLabel::CLASSES[i]` is the label for score index `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmotionLabel {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
    /// No face was found in the frame.
    #[serde(alias = "No Face")]
    NoFace,
}

impl EmotionLabel {
    /// The seven classifier outputs, in score-index order.
    pub const CLASSES: [EmotionLabel; 7] = [
        EmotionLabel::Angry,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Happy,
        EmotionLabel::Sad,
        EmotionLabel::Surprise,
        EmotionLabel::Neutral,
    ];

    /// Labels that always raise an alert.
    pub const NEGATIVE: [EmotionLabel; 4] = [
        EmotionLabel::Angry,
        EmotionLabel::Fear,
        EmotionLabel::Sad,
        EmotionLabel::Disgust,
    ];

    /// Map a classifier score index to its label.
    pub fn from_class_index(index: usize) -> Option<Self> {
        Self::CLASSES.get(index).copied()
    }

    pub fn is_negative(self) -> bool {
        Self::NEGATIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionLabel::Angry => "Angry",
            EmotionLabel::Disgust => "Disgust",
            EmotionLabel::Fear => "Fear",
            EmotionLabel::Happy => "Happy",
            EmotionLabel::Sad => "Sad",
            EmotionLabel::Surprise => "Surprise",
            EmotionLabel::Neutral => "Neutral",
            EmotionLabel::NoFace => "NoFace",
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    /// Clamp to a `frame_width` x `frame_height` frame and round to whole pixels.
    ///
    /// Returns `(x, y, width, height)`, or `None` if nothing of the box
    /// remains inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let fw = frame_width as f32;
        let fh = frame_height as f32;

        let x0 = self.x.max(0.0).min(fw).floor();
        let y0 = self.y.max(0.0).min(fh).floor();
        let x1 = (self.x + self.width).max(0.0).min(fw).ceil();
        let y1 = (self.y + self.height).max(0.0).min(fh).ceil();

        if !(x1 > x0 && y1 > y0) {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
