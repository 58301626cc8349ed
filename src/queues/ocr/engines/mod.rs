//! Recognition engine interface.
//!
//! We don't do any character recognition ourselves. Instead, we wrap an
//! external engine behind [`RecognitionEngine`], which takes raw image bytes
//! and a language, and returns text plus a confidence score.

use std::sync::Arc;

use clap::ValueEnum;
use futures::channel::mpsc;
use schemars::JsonSchema;

use crate::prelude::*;

pub mod echo;
pub mod tesseract;

/// Input to a [`RecognitionEngine`].
pub struct RecognitionInput {
    /// The raw image data.
    pub image: Vec<u8>,

    /// The language to recognize, using Tesseract-style codes like `"eng"`.
    pub language: String,

    /// Where to send progress events, if anybody is listening.
    pub progress: Option<ProgressSender>,
}

impl RecognitionInput {
    /// Report progress to our listener, if we have one.
    ///
    /// Progress is purely informational, so we ignore listeners that have
    /// gone away.
    pub fn report_progress(&self, status: &str, progress: f32) {
        if let Some(tx) = &self.progress {
            let _ = tx.unbounded_send(ProgressEvent {
                status: status.to_owned(),
                progress,
            });
        }
    }
}

/// The text an engine found in an image.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    /// The recognized text.
    pub text: String,

    /// How confident is the engine in this text? From 0 to 100.
    pub confidence: f64,
}

/// A progress event emitted during recognition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// What the engine is doing right now.
    pub status: String,

    /// How far along we are, from 0.0 to 1.0.
    pub progress: f32,
}

/// Sending half of a progress event stream.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Receiving half of a progress event stream.
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Create a new progress event stream.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded()
}

/// Interface to an OCR engine.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
    /// Recognize the text in a single image.
    ///
    /// Fails if the image cannot be read.
    async fn recognize(&self, input: RecognitionInput) -> Result<Recognition>;
}

/// The recognition engines we know about.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// The `tesseract` command-line tool.
    #[default]
    Tesseract,

    /// Treats the image bytes as UTF-8 text. For testing.
    Echo,
}

/// Get the recognition engine of the specified kind.
pub fn recognition_engine_for_kind(kind: EngineKind) -> Arc<dyn RecognitionEngine> {
    match kind {
        EngineKind::Tesseract => Arc::new(tesseract::TesseractEngine::new()),
        EngineKind::Echo => Arc::new(echo::EchoEngine::new()),
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;

    #[tokio::test]
    async fn test_report_progress() {
        let (tx, rx) = progress_channel();
        let input = RecognitionInput {
            image: vec![],
            language: "eng".to_owned(),
            progress: Some(tx),
        };
        input.report_progress("loading image", 0.0);
        input.report_progress("done", 1.0);
        drop(input);

        let events = rx.collect::<Vec<_>>().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, "loading image");
        assert_eq!(events[1].progress, 1.0);
    }

    #[test]
    fn test_report_progress_without_listener() {
        let (tx, rx) = progress_channel();
        drop(rx);
        let input = RecognitionInput {
            image: vec![],
            language: "eng".to_owned(),
            progress: Some(tx),
        };
        // Must not panic.
        input.report_progress("loading image", 0.0);
    }
}
