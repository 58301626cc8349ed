//! The `serve` subcommand.

use std::net::SocketAddr;

use clap::Args;

use crate::{
    config::{ResponseMode, ServerConfig},
    prelude::*,
    queues::ocr::engines::EngineKind,
    server::Server,
};

/// Server command line arguments. Anything set here overrides the config
/// file.
#[derive(Debug, Args)]
pub struct ServeOpts {
    /// A TOML or JSON config file.
    #[clap(long, env = "OCR_CONFIG")]
    pub config: Option<PathBuf>,

    /// The address to listen on.
    #[clap(long, env = "OCR_BIND")]
    pub bind: Option<SocketAddr>,

    /// Wait for OCR results ("blocking"), or return immediately and let the
    /// client poll ("poll").
    #[clap(long, value_enum, env = "OCR_MODE")]
    pub mode: Option<ResponseMode>,

    /// The recognition engine to use.
    #[clap(long, value_enum, env = "OCR_ENGINE")]
    pub engine: Option<EngineKind>,

    /// The language to recognize.
    #[clap(long, env = "OCR_LANGUAGE")]
    pub language: Option<String>,

    /// Max number of OCR jobs to run at a time.
    #[clap(short = 'j', long = "jobs", env = "OCR_JOBS")]
    pub jobs: Option<usize>,

    /// Max number of OCR jobs waiting to run.
    #[clap(long)]
    pub queue_capacity: Option<usize>,

    /// Max request body size, in bytes.
    #[clap(long)]
    pub max_upload_bytes: Option<usize>,

    /// In poll mode, how long to keep results nobody has fetched, in seconds.
    #[clap(long)]
    pub result_ttl_secs: Option<u64>,
}

impl ServeOpts {
    /// Load the config file, then apply our overrides.
    pub async fn to_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref()).await?;
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(engine) = self.engine {
            config.engine = engine;
        }
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config.queue_capacity = queue_capacity;
        }
        if let Some(max_upload_bytes) = self.max_upload_bytes {
            config.max_upload_bytes = max_upload_bytes;
        }
        if let Some(result_ttl_secs) = self.result_ttl_secs {
            config.result_ttl_secs = result_ttl_secs;
        }
        config.validate()?;
        Ok(config)
    }
}

/// The `serve` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_serve(opts: &ServeOpts) -> Result<()> {
    let config = opts.to_config().await?;
    debug!("Server config: {:?}", config);
    let server = Server::bind(&config).await?;
    server.run(shutdown_signal()).await
}

/// Resolves when the user presses Ctrl-C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for Ctrl-C: {:?}", err);
        // Without a signal handler, we can only be killed.
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::with_prefix("serve-test").unwrap();
        let path = dir.path().join("ocr.toml");
        tokio::fs::write(&path, "mode = \"poll\"\njobs = 3\nlanguage = \"deu\"\n")
            .await
            .unwrap();

        let opts = ServeOpts {
            config: Some(path),
            bind: None,
            mode: Some(ResponseMode::Blocking),
            engine: Some(EngineKind::Echo),
            language: None,
            jobs: None,
            queue_capacity: Some(5),
            max_upload_bytes: None,
            result_ttl_secs: Some(30),
        };
        let config = opts.to_config().await.unwrap();
        assert_eq!(config.mode, ResponseMode::Blocking);
        assert_eq!(config.engine, EngineKind::Echo);
        assert_eq!(config.jobs, 3);
        assert_eq!(config.language, "deu");
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.result_ttl_secs, 30);
    }

    #[tokio::test]
    async fn test_flags_can_fix_invalid_config_file() {
        let dir = tempfile::TempDir::with_prefix("serve-test").unwrap();
        let path = dir.path().join("ocr.toml");
        tokio::fs::write(&path, "jobs = 0\n").await.unwrap();

        let mut opts = ServeOpts {
            config: Some(path),
            bind: None,
            mode: None,
            engine: None,
            language: None,
            jobs: None,
            queue_capacity: None,
            max_upload_bytes: None,
            result_ttl_secs: None,
        };
        assert!(opts.to_config().await.is_err());

        opts.jobs = Some(4);
        let config = opts.to_config().await.unwrap();
        assert_eq!(config.jobs, 4);
    }
}
