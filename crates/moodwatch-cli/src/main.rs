use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodwatch_core::{EmotionClassifier, FaceDetector, TensorLayout};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "moodwatch",
    about = "Moodwatch offline emotion classification and model diagnostics"
)]
struct Cli {
    /// Directory containing the ONNX models
    #[arg(long, global = true, env = "MOODWATCH_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// SCRFD detector model file (relative to the model directory)
    #[arg(long, global = true, default_value = "det_10g.onnx")]
    detector: PathBuf,

    /// Emotion classifier model file (relative to the model directory)
    #[arg(long, global = true, default_value = "emotion_classifier.onnx")]
    classifier: PathBuf,

    /// Classifier input layout: nhwc or nchw
    #[arg(long, global = true, default_value = "nhwc")]
    layout: TensorLayout,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the emotion of the first face in an image file
    Classify {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load both models and report whether they are usable
    Check,
}

impl Cli {
    fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(moodwatch_core::default_model_dir)
    }

    fn load_models(&self) -> Result<(FaceDetector, EmotionClassifier)> {
        let dir = self.model_dir();
        let detector_path = dir.join(&self.detector);
        let classifier_path = dir.join(&self.classifier);

        let detector = FaceDetector::load(&detector_path)
            .with_context(|| format!("loading detector {}", detector_path.display()))?;
        let classifier = EmotionClassifier::load(&classifier_path, self.layout)
            .with_context(|| format!("loading classifier {}", classifier_path.display()))?;
        Ok((detector, classifier))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Classify { image, json } => {
            let bytes = std::fs::read(image)
                .with_context(|| format!("reading {}", image.display()))?;
            let (mut detector, mut classifier) = cli.load_models()?;

            let analysis = moodwatch_core::analyze_frame(&bytes, &mut detector, &mut classifier)
                .with_context(|| format!("analysing {}", image.display()))?;

            if *json {
                println!(
                    "{}",
                    serde_json::json!({
                        "emotion": analysis.label,
                        "face": analysis.face,
                    })
                );
            } else {
                match analysis.face {
                    Some(face) => println!(
                        "{}  (face at {:.0},{:.0} {:.0}x{:.0}, confidence {:.2})",
                        analysis.label, face.x, face.y, face.width, face.height, face.confidence
                    ),
                    None => println!("{}", analysis.label),
                }
            }
        }
        Commands::Check => {
            println!("Model directory: {}", cli.model_dir().display());
            cli.load_models()?;
            println!("Detector and classifier loaded successfully");
        }
    }

    Ok(())
}
