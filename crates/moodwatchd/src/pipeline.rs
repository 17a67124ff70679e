use moodwatch_core::EmotionLabel;
use std::sync::Arc;

use crate::alert::should_alert;
use crate::engine::{EngineError, EngineHandle};
use crate::notifier::Notifier;
use crate::store::EmotionStore;

/// Frame in, label out: analyse, record, and raise an alert when required.
pub struct Pipeline {
    engine: EngineHandle,
    store: Arc<EmotionStore>,
    notifier: Arc<dyn Notifier>,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub label: EmotionLabel,
    /// Whether an alert was dispatched for this detection.
    pub alerted: bool,
}

impl Pipeline {
    pub fn new(
        engine: EngineHandle,
        store: Arc<EmotionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { engine, store, notifier }
    }

    pub fn store(&self) -> &Arc<EmotionStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Run one frame through the pipeline.
    ///
    /// Decode and inference errors abort before anything is recorded. The
    /// alert is sent on a background task; its outcome never affects the
    /// returned detection.
    pub async fn detect(&self, frame: Vec<u8>) -> Result<Detection, EngineError> {
        let analysis = self.engine.analyze(frame).await?;
        let label = analysis.label;

        let recorded = self.store.record_detection(label).await;
        tracing::info!(emotion = %label, face = ?analysis.face, "emotion detected");

        let alerted = should_alert(label, recorded.permitted);
        if alerted {
            self.dispatch_alert(label);
        }

        Ok(Detection { label, alerted })
    }

    fn dispatch_alert(&self, label: EmotionLabel) {
        let notifier = self.notifier.clone();
        tracing::info!(emotion = %label, "dispatching alert");
        tokio::spawn(async move {
            if let Err(err) = notifier.send_alert(label).await {
                tracing::warn!(emotion = %label, error = %err, "alert delivery failed");
            }
        });
    }
}
