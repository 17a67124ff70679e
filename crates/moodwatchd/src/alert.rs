use moodwatch_core::EmotionLabel;

/// Decide whether a detection raises an alert.
///
/// Alerts fire when the label is explicitly disallowed, OR when it is in the
/// negative set. The OR is deliberate: a permission entry cannot silence
/// `Angry`, `Fear`, `Sad` or `Disgust`. `permitted` is the label's map entry,
/// `true` when absent.
pub fn should_alert(label: EmotionLabel, permitted: bool) -> bool {
    !permitted || label.is_negative()
}
