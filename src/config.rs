//! Server configuration.
//!
//! Configuration can come from an optional TOML (or JSON) file. Command-line
//! flags and environment variables, handled by `clap`, override the file.

use std::{net::SocketAddr, time::Duration};

use clap::ValueEnum;
use schemars::JsonSchema;

use crate::{
    async_utils::io::read_json_or_toml,
    prelude::*,
    queues::{
        ocr::{DEFAULT_LANGUAGE, engines::EngineKind},
        work::JobQueueOpts,
    },
};

/// How should `POST /api/ocr` respond?
#[derive(
    Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Wait for the OCR job to finish, and return its result.
    #[default]
    Blocking,

    /// Return a `processing` result immediately. The client polls
    /// `GET /api/ocr/:id` for the final result.
    Poll,
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The address to listen on.
    pub bind: SocketAddr,

    /// How `POST /api/ocr` responds.
    pub mode: ResponseMode,

    /// Which recognition engine to use.
    pub engine: EngineKind,

    /// The language passed to the recognition engine.
    pub language: String,

    /// How many OCR jobs may run at once.
    pub jobs: usize,

    /// How many OCR jobs may wait for a free slot before uploads are
    /// rejected.
    pub queue_capacity: usize,

    /// The largest request body we accept, in bytes.
    pub max_upload_bytes: usize,

    /// In poll mode, how long to keep a final result that nobody has
    /// fetched, in seconds.
    pub result_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            mode: ResponseMode::default(),
            engine: EngineKind::default(),
            language: DEFAULT_LANGUAGE.to_owned(),
            jobs: num_cpus::get(),
            queue_capacity: 64,
            max_upload_bytes: 20 * 1024 * 1024,
            result_ttl_secs: 600,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a file, or use the defaults if no file was
    /// given.
    ///
    /// This doesn't call [`ServerConfig::validate`], because command-line
    /// overrides may still fix bad values.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => read_json_or_toml::<Self>(path)
                .await
                .with_context(|| format!("failed to load config from {:?}", path)),
            None => Ok(Self::default()),
        }
    }

    /// Check for values that can't work.
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(anyhow!("jobs must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be at least 1"));
        }
        if self.language.trim().is_empty() {
            return Err(anyhow!("language must not be empty"));
        }
        if self.result_ttl_secs == 0 {
            return Err(anyhow!("result_ttl_secs must be at least 1"));
        }
        Ok(())
    }

    /// How long to keep unfetched poll-mode results.
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    /// Options for the OCR job queue.
    pub fn job_queue_opts(&self) -> JobQueueOpts {
        JobQueueOpts {
            concurrency_limit: self.jobs,
            capacity: self.queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_defaults() {
        let config = ServerConfig::load(None).await.unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.mode, ResponseMode::Blocking);
        assert_eq!(config.language, "eng");
    }

    #[tokio::test]
    async fn test_load_partial_toml() {
        let dir = tempfile::TempDir::with_prefix("config-test").unwrap();
        let path = dir.path().join("ocr.toml");
        tokio::fs::write(
            &path,
            "bind = \"0.0.0.0:8080\"\nmode = \"poll\"\nengine = \"echo\"\n",
        )
        .await
        .unwrap();

        let config = ServerConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.mode, ResponseMode::Poll);
        assert_eq!(config.engine, EngineKind::Echo);
        assert_eq!(config.queue_capacity, 64);
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_fields() {
        let dir = tempfile::TempDir::with_prefix("config-test").unwrap();

        let path = dir.path().join("unknown.toml");
        tokio::fs::write(&path, "colour = \"blue\"\n").await.unwrap();
        assert!(ServerConfig::load(Some(&path)).await.is_err());

        let path = dir.path().join("zero.toml");
        tokio::fs::write(&path, "jobs = 0\n").await.unwrap();
        let config = ServerConfig::load(Some(&path)).await.unwrap();
        assert!(config.validate().is_err());
    }
}
