//! The OCR upload endpoint, `POST /api/ocr`, and its polling companion.

use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::{AppState, api_error::ApiError};
use crate::{
    config::ResponseMode,
    prelude::*,
    queues::ocr::{JobPayload, OcrResult},
};

/// The multipart field containing the uploaded image.
const IMAGE_FIELD: &str = "image";

/// MIME type to use when the client doesn't send one.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// An image file pulled out of a multipart upload.
#[derive(Debug)]
struct UploadedImage {
    file_name: String,
    mime_type: String,
    data: Vec<u8>,
}

/// Handler for `POST /api/ocr`.
///
/// A body that isn't valid `multipart/form-data` is a processing failure, not
/// a missing image, so the rejection becomes a 500.
#[instrument(level = "info", name = "post_ocr", skip_all)]
pub async fn post_ocr(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.context("cannot read multipart request")?;
    let image = read_image_field(&mut multipart)
        .await?
        .ok_or(ApiError::NoImageProvided)?;
    debug!(
        file_name = %image.file_name,
        mime_type = %image.mime_type,
        size = image.data.len(),
        "Received image upload"
    );

    let payload = JobPayload::from_image(&image.file_name, &image.mime_type, &image.data);
    let handle = state.ocr_jobs.submit(payload)?;
    debug!(job = state.ocr_jobs.name(), run = handle.run(), "Queued OCR job");

    match state.mode {
        ResponseMode::Blocking => {
            let result = handle.result().await?;
            Ok(Json(result).into_response())
        }
        ResponseMode::Poll => {
            let pending = OcrResult::processing();
            state.results.track(pending.clone(), handle);
            Ok((StatusCode::ACCEPTED, Json(pending)).into_response())
        }
    }
}

/// Handler for `GET /api/ocr/:id`.
#[instrument(level = "debug", skip_all, fields(id = %id))]
pub async fn get_ocr_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OcrResult>, ApiError> {
    state
        .results
        .fetch(&id)
        .map(Json)
        .ok_or(ApiError::ResultNotFound)
}

/// Find the first `image` field and read it. Other fields are ignored.
///
/// Returns `None` if there is no `image` field, or if it isn't a file.
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<UploadedImage>> {
    let mut seen_field = false;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            // A form with no parts at all is only a closing boundary, which
            // the parser reports as an error. There's no image in it either
            // way.
            Err(err) if !seen_field => {
                debug!("Multipart body has no fields: {}", err);
                return Ok(None);
            }
            Err(err) => return Err(err).context("cannot read multipart field"),
        };
        seen_field = true;
        if field.name() == Some(IMAGE_FIELD) {
            return read_image_file(field).await;
        }
    }
}

/// Read an `image` field, if it's a file.
async fn read_image_file(field: Field<'_>) -> Result<Option<UploadedImage>> {
    let Some(file_name) = field.file_name().map(str::to_owned) else {
        return Ok(None);
    };
    let mime_type = field.content_type().unwrap_or(DEFAULT_MIME_TYPE).to_owned();
    let data = field
        .bytes()
        .await
        .with_context(|| format!("cannot read uploaded file {:?}", file_name))?;
    Ok(Some(UploadedImage {
        file_name,
        mime_type,
        data: data.to_vec(),
    }))
}
