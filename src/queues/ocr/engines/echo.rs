//! Echo engine for testing.
//!
//! This engine "recognizes" an image by decoding its bytes as UTF-8 text. It
//! lets us exercise the whole upload pipeline without installing `tesseract`,
//! and it fails on binary data the same way a real engine fails on corrupt
//! images.

use crate::prelude::*;

use super::{Recognition, RecognitionEngine, RecognitionInput};

/// Echo engine for testing.
#[derive(Debug, Default)]
pub struct EchoEngine;

impl EchoEngine {
    /// Create a new echo engine.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecognitionEngine for EchoEngine {
    #[instrument(level = "debug", skip_all, fields(language = %input.language))]
    async fn recognize(&self, input: RecognitionInput) -> Result<Recognition> {
        input.report_progress("recognizing text", 0.0);
        if input.image.is_empty() {
            return Err(anyhow!("image is empty"));
        }
        let text = std::str::from_utf8(&input.image)
            .context("image data is not readable")?
            .to_owned();
        input.report_progress("done", 1.0);
        Ok(Recognition {
            text,
            confidence: 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(image: &[u8]) -> RecognitionInput {
        RecognitionInput {
            image: image.to_vec(),
            language: "eng".to_owned(),
            progress: None,
        }
    }

    #[tokio::test]
    async fn test_echo_recognizes_utf8() {
        let recognition = EchoEngine::new().recognize(input(b"Hello")).await.unwrap();
        assert_eq!(recognition.text, "Hello");
        assert_eq!(recognition.confidence, 100.0);
    }

    #[tokio::test]
    async fn test_echo_rejects_binary_and_empty_images() {
        let engine = EchoEngine::new();
        assert!(engine.recognize(input(&[0xff, 0xfe, 0x00])).await.is_err());
        assert!(engine.recognize(input(b"")).await.is_err());
    }
}
