use moodwatch_core::TensorLayout;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector file name, relative to `model_dir` unless absolute.
    pub detector_model: PathBuf,
    /// Emotion classifier file name, relative to `model_dir` unless absolute.
    pub classifier_model: PathBuf,
    /// Input layout of the emotion classifier.
    pub classifier_layout: TensorLayout,
    /// Upper bound on one frame analysis, including queueing.
    pub inference_timeout: Duration,
    /// Maximum number of log entries retained in memory.
    pub log_capacity: usize,
    /// Number of entries returned by `/emotion-logs`.
    pub recent_window: usize,
    /// Request body limit for uploaded frames.
    pub max_frame_bytes: usize,
    pub mail: MailConfig,
}

/// SMTP settings for alert delivery.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    /// Use STARTTLS.
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// From address; defaults to `username`.
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub timeout: Duration,
}

impl MailConfig {
    /// Mail delivery needs at least a sender and a recipient.
    pub fn is_enabled(&self) -> bool {
        self.sender().is_some() && self.recipient.is_some()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref().or(self.username.as_deref())
    }
}

impl Config {
    /// Load configuration from `MOODWATCH_*` and `MAIL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("MOODWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(moodwatch_core::default_model_dir);

        let mail = MailConfig {
            server: var("MAIL_SERVER").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            port: parse_var(&var, "MAIL_PORT").unwrap_or(587),
            use_tls: var("MAIL_USE_TLS").map(|v| parse_flag(&v)).unwrap_or(true),
            username: var("MAIL_USERNAME").filter(|v| !v.is_empty()),
            password: var("MAIL_PASSWORD").filter(|v| !v.is_empty()),
            sender: var("MAIL_SENDER").filter(|v| !v.is_empty()),
            recipient: var("PARENT_EMAIL").filter(|v| !v.is_empty()),
            timeout: Duration::from_secs(
                parse_var(&var, "MOODWATCH_MAIL_TIMEOUT_SECS").unwrap_or(15),
            ),
        };

        Self {
            bind: parse_var(&var, "MOODWATCH_BIND")
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 5000))),
            model_dir,
            detector_model: var("MOODWATCH_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("det_10g.onnx")),
            classifier_model: var("MOODWATCH_CLASSIFIER_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("emotion_classifier.onnx")),
            classifier_layout: parse_var(&var, "MOODWATCH_CLASSIFIER_LAYOUT").unwrap_or_default(),
            inference_timeout: Duration::from_secs(
                parse_var(&var, "MOODWATCH_INFERENCE_TIMEOUT_SECS").unwrap_or(10),
            ),
            log_capacity: parse_var(&var, "MOODWATCH_LOG_CAPACITY").unwrap_or(2000).max(1),
            recent_window: parse_var(&var, "MOODWATCH_RECENT_WINDOW").unwrap_or(20),
            max_frame_bytes: parse_var(&var, "MOODWATCH_MAX_FRAME_BYTES")
                .unwrap_or(10 * 1024 * 1024),
            mail,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the emotion classification model.
    pub fn classifier_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.classifier_model)
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
