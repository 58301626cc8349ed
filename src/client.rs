//! Client for the OCR server.
//!
//! [`ClientSession`] models the same states as the browser UI: pick an image,
//! send it for extraction, then show either the result or an error. The
//! `upload` subcommand drives a session with [`OcrClient`].

use std::time::Duration;

use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};

use crate::{
    prelude::*,
    queues::ocr::{OcrResult, OcrStatus},
};

/// The name of the file produced by [`ClientSession::download`].
pub const DOWNLOAD_FILE_NAME: &str = "extracted-text.txt";

/// Shown when the user picks something which isn't an image.
pub const INVALID_IMAGE_MESSAGE: &str = "Please select a valid image file";

/// Shown when extraction fails for any reason.
pub const PROCESSING_FAILED_MESSAGE: &str = "OCR processing failed";

/// Shown instead of the text when nothing was found.
pub const NO_TEXT_MESSAGE: &str = "No text found in the image";

/// How often we poll a server running in poll mode.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// An image picked by the user.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedImage {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl SelectedImage {
    /// Read an image from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {:?}", path))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        Ok(Self {
            file_name,
            mime_type,
            data,
        })
    }

    /// Is this an image?
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Where a session is.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientState {
    /// Nothing selected yet.
    Idle,
    /// An image is ready to send.
    ImageSelected,
    /// Waiting for the server.
    Processing,
    /// The server returned a result.
    ResultShown(OcrResult),
    /// Something went wrong.
    ErrorShown(String),
}

/// What we show for a result.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultDisplay {
    pub text: String,
    pub confidence_label: String,
}

/// A file to save locally.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadFile {
    pub file_name: &'static str,
    pub contents: String,
}

/// One user's interaction with the OCR UI.
#[derive(Debug)]
pub struct ClientSession {
    state: ClientState,
    image: Option<SelectedImage>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    /// Create a new, idle session.
    pub fn new() -> Self {
        Self {
            state: ClientState::Idle,
            image: None,
        }
    }

    /// Our current state.
    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// The currently selected image, if any.
    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    /// Select an image. Anything which isn't an image is rejected, and clears
    /// the current selection.
    pub fn select(&mut self, image: SelectedImage) -> bool {
        if self.state == ClientState::Processing {
            warn!("Ignoring selection while processing");
            return false;
        }
        if image.is_image() {
            self.image = Some(image);
            self.state = ClientState::ImageSelected;
            true
        } else {
            self.image = None;
            self.state = ClientState::ErrorShown(INVALID_IMAGE_MESSAGE.to_owned());
            false
        }
    }

    /// Start extraction, returning the image to send.
    pub fn begin_extraction(&mut self) -> Result<SelectedImage> {
        if self.state == ClientState::Processing {
            return Err(anyhow!("extraction is already running"));
        }
        let image = self
            .image
            .clone()
            .ok_or_else(|| anyhow!("no image selected"))?;
        self.state = ClientState::Processing;
        Ok(image)
    }

    /// Finish extraction with the server's answer.
    pub fn finish_extraction(&mut self, outcome: Result<OcrResult>) {
        if self.state != ClientState::Processing {
            warn!("Ignoring extraction result outside of processing state");
            return;
        }
        self.state = match outcome {
            Ok(result) => ClientState::ResultShown(result),
            Err(err) => {
                debug!("Extraction failed: {:?}", err);
                ClientState::ErrorShown(PROCESSING_FAILED_MESSAGE.to_owned())
            }
        };
    }

    /// How to display the current result, if we have one.
    pub fn display(&self) -> Option<ResultDisplay> {
        let ClientState::ResultShown(result) = &self.state else {
            return None;
        };
        let text = if result.text.is_empty() {
            NO_TEXT_MESSAGE.to_owned()
        } else {
            result.text.clone()
        };
        Some(ResultDisplay {
            text,
            confidence_label: format!("Confidence: {}%", result.confidence.round()),
        })
    }

    /// Package the current result as a text file. Only available when there
    /// is a result with some text.
    pub fn download(&self) -> Option<DownloadFile> {
        match &self.state {
            ClientState::ResultShown(result) if !result.text.is_empty() => {
                Some(DownloadFile {
                    file_name: DOWNLOAD_FILE_NAME,
                    contents: result.text.clone(),
                })
            }
            _ => None,
        }
    }
}

/// HTTP client for the OCR server.
#[derive(Clone, Debug)]
pub struct OcrClient {
    http: reqwest::Client,
    base_url: String,
}

impl OcrClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Send the session's image for extraction, and record the outcome.
    #[instrument(level = "debug", skip_all, fields(base_url = %self.base_url))]
    pub async fn extract(&self, session: &mut ClientSession) -> Result<()> {
        let image = session.begin_extraction()?;
        let outcome = self.upload(&image).await;
        if let Err(err) = &outcome {
            warn!("OCR request failed: {:?}", err);
        }
        session.finish_extraction(outcome);
        Ok(())
    }

    /// Upload an image and wait for the result.
    async fn upload(&self, image: &SelectedImage) -> Result<OcrResult> {
        let part = Part::bytes(image.data.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime_type)
            .context("invalid MIME type")?;
        let form = Form::new().part("image", part);
        let response = self
            .http
            .post(format!("{}/api/ocr", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("cannot reach OCR server")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("OCR server returned {}", status));
        }
        let mut result = response
            .json::<OcrResult>()
            .await
            .context("cannot parse OCR result")?;

        // Poll until the job is done.
        while status == StatusCode::ACCEPTED || result.status == OcrStatus::Processing {
            tokio::time::sleep(POLL_INTERVAL).await;
            result = self.poll(&result.id).await?;
            if result.is_finished() {
                break;
            }
        }
        Ok(result)
    }

    /// Fetch the current state of a result.
    async fn poll(&self, id: &str) -> Result<OcrResult> {
        let response = self
            .http
            .get(format!("{}/api/ocr/{}", self.base_url, id))
            .send()
            .await
            .context("cannot reach OCR server")?
            .error_for_status()
            .context("cannot poll OCR result")?;
        response
            .json::<OcrResult>()
            .await
            .context("cannot parse OCR result")
    }
}
