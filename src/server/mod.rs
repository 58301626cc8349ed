//! HTTP server.
//!
//! Routes:
//!
//! - `GET /`: the browser UI.
//! - `GET /api/health`: liveness check.
//! - `POST /api/ocr`: upload an image for OCR.
//! - `GET /api/ocr/:id`: fetch a result submitted in poll mode.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    async_utils::JoinWorker,
    config::{ResponseMode, ServerConfig},
    prelude::*,
    queues::{
        ocr::{
            JobPayload, OcrResult, create_ocr_job_queue,
            engines::{RecognitionEngine, recognition_engine_for_kind},
        },
        work::{JobQueue, JobQueueHandle},
    },
};

use self::results::PendingResults;

pub mod api_error;
mod control_ui;
mod ocr_api;
mod results;

/// Application state shared across routes.
#[derive(Clone)]
pub struct AppState {
    /// How `POST /api/ocr` responds.
    pub mode: ResponseMode,

    /// Where we submit `ocr-process` jobs.
    pub ocr_jobs: JobQueueHandle<JobPayload, OcrResult>,

    /// Results waiting to be polled.
    pub results: Arc<PendingResults>,
}

/// Build our router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(control_ui::index))
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/ocr", post(ocr_api::post_ocr))
        .route("/api/ocr/:id", get(ocr_api::get_ocr_result))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A server which has been bound to a port, but isn't serving yet.
pub struct Server {
    listener: TcpListener,
    app: Router,
    queue: JobQueue<JobPayload, OcrResult>,
    worker: JoinWorker,
}

impl Server {
    /// Bind a server using the configured recognition engine.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let engine = recognition_engine_for_kind(config.engine);
        Self::bind_with_engine(config, engine).await
    }

    /// Bind a server using the specified recognition engine.
    pub async fn bind_with_engine(
        config: &ServerConfig,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let (queue, worker) =
            create_ocr_job_queue(engine, config.language.clone(), config.job_queue_opts())?;
        let state = AppState {
            mode: config.mode,
            ocr_jobs: queue.handle(),
            results: Arc::new(PendingResults::new(config.result_ttl())),
        };
        let app = router(state, config.max_upload_bytes);
        let listener = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("cannot listen on {}", config.bind))?;
        Ok(Self {
            listener,
            app,
            queue,
            worker,
        })
    }

    /// The address we're actually listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("cannot get local address")
    }

    /// Serve requests until `shutdown` resolves, then wait for running jobs
    /// to finish.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            app,
            queue,
            worker,
        } = self;
        info!("OCR server listening on {}", listener.local_addr()?);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server failed")?;

        // Dropping the last queue handle lets the worker drain and exit.
        info!("Waiting for running OCR jobs to finish");
        drop(queue);
        worker.join().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::{
        StatusCode,
        multipart::{Form, Part},
    };

    use super::*;
    use crate::{
        queues::ocr::{OcrStatus, engines::EngineKind},
        server::api_error::ErrorBody,
    };

    /// Start a server using the echo engine, and return its base URL.
    async fn start_test_server(mode: ResponseMode) -> String {
        let config = ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            mode,
            engine: EngineKind::Echo,
            jobs: 2,
            queue_capacity: 8,
            max_upload_bytes: 1024,
            ..ServerConfig::default()
        };
        let server = Server::bind(&config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run(std::future::pending()));
        format!("http://{addr}")
    }

    /// Build a form with an `image` file field.
    fn image_form(data: &[u8], file_name: &str, mime_type: &str) -> Form {
        let part = Part::bytes(data.to_vec())
            .file_name(file_name.to_owned())
            .mime_str(mime_type)
            .unwrap();
        Form::new().part("image", part)
    }

    async fn post_form(base: &str, form: Form) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}/api/ocr"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_index_and_health() {
        let base = start_test_server(ResponseMode::Blocking).await;

        let page = reqwest::get(format!("{base}/")).await.unwrap();
        assert_eq!(page.status(), StatusCode::OK);
        assert!(page.text().await.unwrap().contains("Extract Text"));

        let health = reqwest::get(format!("{base}/api/health")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_upload_returns_completed_result() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let response = post_form(&base, image_form(b"Hello", "photo.png", "image/png")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let result = response.json::<OcrResult>().await.unwrap();
        assert_eq!(result.status, OcrStatus::Completed);
        assert_eq!(result.text, "Hello");
        assert!((0.0..=100.0).contains(&result.confidence));
        assert!(result.id.starts_with("ocr_"));
    }

    #[tokio::test]
    async fn test_unreadable_image_is_a_failed_result_not_an_error() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let form = image_form(&[0xff, 0xd8, 0xff, 0x00], "photo.jpg", "image/jpeg");
        let response = post_form(&base, form).await;
        assert_eq!(response.status(), StatusCode::OK);

        let result = response.json::<OcrResult>().await.unwrap();
        assert_eq!(result.status, OcrStatus::Failed);
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_missing_image_is_a_client_error() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let forms = [
            Form::new(),
            Form::new().text("comment", "no image here"),
            // A text field named `image` isn't a file.
            Form::new().text("image", "Hello"),
            Form::new().part(
                "picture",
                Part::bytes(b"Hello".to_vec()).file_name("photo.png"),
            ),
        ];
        for form in forms {
            let response = post_form(&base, form).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = response.json::<ErrorBody>().await.unwrap();
            assert_eq!(body.error, "No image provided");
        }
    }

    #[tokio::test]
    async fn test_empty_form_is_a_client_error() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let client = reqwest::Client::new();

        // Exactly what `Form::new()` sends: a closing boundary and nothing
        // else.
        let response = client
            .post(format!("{base}/api/ocr"))
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body("--XYZ--\r\n")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.json::<ErrorBody>().await.unwrap();
        assert_eq!(body.error, "No image provided");

        let response = post_form(&base, Form::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_other_fields_are_ignored() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let form = Form::new()
            .text("comment", "please")
            .part(
                "image",
                Part::bytes(b"Hello".to_vec()).file_name("photo.png"),
            );
        let response = post_form(&base, form).await;
        assert_eq!(response.status(), StatusCode::OK);
        let result = response.json::<OcrResult>().await.unwrap();
        assert_eq!(result.text, "Hello");
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_server_error() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let client = reqwest::Client::new();

        // Not multipart at all.
        let response = client
            .post(format!("{base}/api/ocr"))
            .header("content-type", "application/json")
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.json::<ErrorBody>().await.unwrap();
        assert_eq!(body.error, "Failed to process image");

        // Claims to be multipart, but the body is truncated.
        let response = client
            .post(format!("{base}/api/ocr"))
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body("--XYZ\r\nContent-Disposition: form-data; name=\"image\"; filename=\"a.png\"\r\n\r\nHel")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_a_server_error() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let big = vec![b'a'; 4096];
        let response = post_form(&base, image_form(&big, "big.png", "image/png")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_same_image_twice() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let first = post_form(&base, image_form(b"Hello", "photo.png", "image/png"))
            .await
            .json::<OcrResult>()
            .await
            .unwrap();
        let second = post_form(&base, image_form(b"Hello", "photo.png", "image/png"))
            .await
            .json::<OcrResult>()
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.text, second.text);
        assert_eq!(first.confidence, second.confidence);
    }

    #[tokio::test]
    async fn test_poll_mode() {
        let base = start_test_server(ResponseMode::Poll).await;
        let response = post_form(&base, image_form(b"Hello", "photo.png", "image/png")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let pending = response.json::<OcrResult>().await.unwrap();
        assert_eq!(pending.status, OcrStatus::Processing);

        let url = format!("{base}/api/ocr/{}", pending.id);
        let finished = loop {
            let response = reqwest::get(&url).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let result = response.json::<OcrResult>().await.unwrap();
            if result.is_finished() {
                break result;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(finished.id, pending.id);
        assert_eq!(finished.status, OcrStatus::Completed);
        assert_eq!(finished.text, "Hello");

        // Finished results are only handed out once.
        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.json::<ErrorBody>().await.unwrap();
        assert_eq!(body.error, "Result not found");
    }

    #[tokio::test]
    async fn test_blocking_mode_never_stores_results() {
        let base = start_test_server(ResponseMode::Blocking).await;
        let result = post_form(&base, image_form(b"Hello", "photo.png", "image/png"))
            .await
            .json::<OcrResult>()
            .await
            .unwrap();
        let response = reqwest::get(format!("{base}/api/ocr/{}", result.id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let config = ServerConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            engine: EngineKind::Echo,
            ..ServerConfig::default()
        };
        let server = Server::bind(&config).await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async move {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
