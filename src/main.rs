use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod client;
mod cmd;
mod config;
mod cpu_limit;
mod prelude;
mod queues;
mod server;
mod ui;

/// Extract text from images, from the command line or over HTTP.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - RUST_LOG (optional): Log filter. Defaults to "info".
  - OCR_BIND, OCR_MODE, OCR_ENGINE, OCR_LANGUAGE, OCR_JOBS (optional):
    Server settings, overriding the config file.
  - OCR_SERVER (optional): The server used by `upload`.

  The `tesseract` engine needs the `tesseract` command on your PATH.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Run the OCR web server and browser UI.
    Serve(cmd::serve::ServeOpts),
    /// Extract text from a local image and print the result as JSON.
    Extract(cmd::extract::ExtractOpts),
    /// Upload an image to a running server and print the extracted text.
    Upload(cmd::upload::UploadOpts),
    /// Print schemas for our JSON formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            // The server only logs, but progress bars make no sense there.
            Cmd::Serve(_) => true,
            Cmd::Extract(opts) => opts.output_path.is_none(),
            // The spinner is finished before we print the text.
            Cmd::Upload(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Serve(opts) => {
            cmd::serve::cmd_serve(opts).await?;
        }
        Cmd::Extract(opts) => {
            cmd::extract::cmd_extract(ui, opts).await?;
        }
        Cmd::Upload(opts) => {
            cmd::upload::cmd_upload(ui, opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cmd {
        let mut argv = vec!["ocr-extractor"];
        argv.extend_from_slice(args);
        Opts::try_parse_from(argv).unwrap().subcmd
    }

    #[test]
    fn test_progress_bars_shown_only_without_stdout_output() {
        assert!(!parse(&["upload", "photo.png"]).using_stdout_for_output());
        assert!(!parse(&["extract", "photo.png", "-o", "out.json"]).using_stdout_for_output());
        assert!(parse(&["extract", "photo.png"]).using_stdout_for_output());
        assert!(parse(&["schema", "OcrResult"]).using_stdout_for_output());
        assert!(parse(&["serve"]).using_stdout_for_output());
    }
}
