//! The `ocr-process` job.
//!
//! This job takes an uploaded image (as Base64 text, so it can travel through
//! a queue as plain data), runs it through a [`RecognitionEngine`], and
//! returns an [`OcrResult`]. It never fails: recognition errors are logged and
//! turned into a result with `status: "failed"`.

pub mod engines;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use futures::{FutureExt as _, StreamExt as _};
use schemars::JsonSchema;

use self::engines::{
    ProgressReceiver, ProgressSender, Recognition, RecognitionEngine, RecognitionInput,
    progress_channel,
};
use crate::{
    async_utils::JoinWorker,
    prelude::*,
    queues::work::{JobFn, JobQueue, JobQueueOpts},
};

/// The name of our OCR job.
pub const OCR_PROCESS_JOB: &str = "ocr-process";

/// The language we ask the recognition engine for, unless configured
/// otherwise.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// An uploaded image, ready to be sent to the `ocr-process` job.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobPayload {
    /// The image data, Base64-encoded.
    pub image_data: String,

    /// The name of the uploaded file.
    pub file_name: String,

    /// The MIME type declared by the uploader.
    pub mime_type: String,
}

impl JobPayload {
    /// Build a payload from raw image data.
    pub fn from_image(file_name: &str, mime_type: &str, data: &[u8]) -> Self {
        Self {
            image_data: BASE64_STANDARD.encode(data),
            file_name: file_name.to_owned(),
            mime_type: mime_type.to_owned(),
        }
    }

    /// Decode the raw image data.
    pub fn decode_image(&self) -> Result<Vec<u8>> {
        BASE64_STANDARD
            .decode(&self.image_data)
            .with_context(|| format!("invalid Base64 image data for {:?}", self.file_name))
    }
}

/// The status of an OCR request.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrStatus {
    /// The text was extracted.
    Completed,

    /// The job is still running. Only returned when results are polled.
    Processing,

    /// The image could not be read.
    Failed,
}

/// The result of an OCR request.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct OcrResult {
    /// A unique ID, of the form `ocr_<unix milliseconds>`.
    pub id: String,

    /// The extracted text. Empty unless `status` is `completed`.
    pub text: String,

    /// How confident the engine is in `text`, from 0 to 100.
    pub confidence: f64,

    /// What happened?
    pub status: OcrStatus,
}

impl OcrResult {
    /// A successful result.
    pub fn completed(recognition: Recognition) -> Self {
        let confidence = if recognition.confidence.is_finite() {
            recognition.confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            id: next_result_id(),
            text: recognition.text,
            confidence,
            status: OcrStatus::Completed,
        }
    }

    /// A failed result.
    pub fn failed() -> Self {
        Self {
            id: next_result_id(),
            text: String::new(),
            confidence: 0.0,
            status: OcrStatus::Failed,
        }
    }

    /// A placeholder for a job which is still running.
    pub fn processing() -> Self {
        Self {
            id: next_result_id(),
            text: String::new(),
            confidence: 0.0,
            status: OcrStatus::Processing,
        }
    }

    /// Is this result final?
    pub fn is_finished(&self) -> bool {
        self.status != OcrStatus::Processing
    }
}

/// The last timestamp we handed out as an ID.
static LAST_RESULT_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Generate a new result ID from the current time.
///
/// IDs are strictly increasing within this process, so two results created
/// in the same millisecond still get different IDs.
pub fn next_result_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let prev = LAST_RESULT_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or_else(|last| last);
    format!("ocr_{}", now.max(prev + 1))
}

/// Run the `ocr-process` job on a single payload.
///
/// Progress events from the engine are sent to `progress`, if provided.
#[instrument(level = "info", skip_all, fields(file_name = %payload.file_name))]
pub async fn ocr_process(
    engine: &dyn RecognitionEngine,
    language: &str,
    payload: JobPayload,
    progress: Option<ProgressSender>,
) -> OcrResult {
    info!("Processing OCR for file: {}", payload.file_name);
    match ocr_process_inner(engine, language, &payload, progress).await {
        Ok(recognition) => {
            let result = OcrResult::completed(recognition);
            info!("OCR completed with {}% confidence", result.confidence);
            result
        }
        Err(err) => {
            error!("OCR processing failed: {:?}", err);
            OcrResult::failed()
        }
    }
}

/// Perform actual work for `ocr_process`.
async fn ocr_process_inner(
    engine: &dyn RecognitionEngine,
    language: &str,
    payload: &JobPayload,
    progress: Option<ProgressSender>,
) -> Result<Recognition> {
    let image = payload.decode_image()?;
    engine
        .recognize(RecognitionInput {
            image,
            language: language.to_owned(),
            progress,
        })
        .await
        .with_context(|| format!("failed to recognize text in {:?}", payload.file_name))
}

/// Log progress events until the engine finishes.
async fn log_progress(rx: ProgressReceiver) {
    rx.for_each(|event| async move {
        debug!(status = %event.status, progress = event.progress, "OCR progress");
    })
    .await
}

/// Create a job queue which runs `ocr-process` jobs.
pub fn create_ocr_job_queue(
    engine: Arc<dyn RecognitionEngine>,
    language: String,
    opts: JobQueueOpts,
) -> Result<(JobQueue<JobPayload, OcrResult>, JoinWorker)> {
    let job_fn: JobFn<JobPayload, OcrResult> = Arc::new(move |payload: JobPayload| {
        let engine = engine.clone();
        let language = language.clone();
        async move {
            let (tx, rx) = progress_channel();
            let (result, ()) = futures::join!(
                ocr_process(engine.as_ref(), &language, payload, Some(tx)),
                log_progress(rx),
            );
            result
        }
        .boxed()
    });
    JobQueue::new(OCR_PROCESS_JOB, opts, job_fn)
}
