use moodwatch_core::{
    Analysis, AnalysisError, EmotionClassifier, EmotionModel, FaceDetector, FaceLocator,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] moodwatch_core::DetectorError),
    #[error("classifier error: {0}")]
    Classifier(#[from] moodwatch_core::ClassifierError),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] moodwatch_core::FrameError),
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<AnalysisError> for EngineError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::InvalidImage(e) => EngineError::InvalidImage(e),
            AnalysisError::Detector(e) => EngineError::Detector(e),
            AnalysisError::Classifier(e) => EngineError::Classifier(e),
        }
    }
}

/// A frame waiting for the engine thread.
struct AnalyzeRequest {
    frame: Vec<u8>,
    reply: oneshot::Sender<Result<Analysis, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<AnalyzeRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Decode, detect and classify one encoded frame.
    ///
    /// The timeout covers queueing behind other requests as well as inference.
    pub async fn analyze(&self, frame: Vec<u8>) -> Result<Analysis, EngineError> {
        let request = async {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.tx
                .send(AnalyzeRequest { frame, reply: reply_tx })
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Load both ONNX models from the configured paths and start the engine.
/// Fails fast if either model is missing or cannot be loaded.
pub fn load_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector_path = config.detector_model_path();
    let detector = FaceDetector::load(&detector_path)?;
    tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

    let classifier_path = config.classifier_model_path();
    let classifier = EmotionClassifier::load(&classifier_path, config.classifier_layout)?;
    tracing::info!(path = %classifier_path.display(), "emotion classifier loaded");

    spawn_engine(Box::new(detector), Box::new(classifier), config.inference_timeout)
}

/// Spawn the engine on a dedicated OS thread.
///
/// Inference sessions need exclusive access, so every frame is analysed
/// on this one thread in arrival order.
pub fn spawn_engine(
    mut locator: Box<dyn FaceLocator + Send>,
    mut model: Box<dyn EmotionModel + Send>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<AnalyzeRequest>(8);

    std::thread::Builder::new()
        .name("moodwatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(AnalyzeRequest { frame, reply }) = rx.blocking_recv() {
                // The caller timed out while this frame was queued.
                if reply.is_closed() {
                    tracing::debug!("skipping abandoned frame");
                    continue;
                }
                let result =
                    moodwatch_core::analyze_frame(&frame, locator.as_mut(), model.as_mut())
                        .map_err(EngineError::from);
                if let Err(err) = &result {
                    tracing::debug!(error = %err, "frame analysis failed");
                }
                // The caller may have timed out during inference.
                let _ = reply.send(result);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, timeout })
}
