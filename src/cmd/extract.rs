//! The `extract` subcommand.
//!
//! Runs the `ocr-process` job on a local file, without a server. Handy for
//! checking that the recognition engine is installed and working.

use clap::Args;
use futures::{StreamExt as _, future};

use crate::{
    async_utils::io::write_json_output,
    prelude::*,
    queues::ocr::{
        DEFAULT_LANGUAGE, JobPayload, OcrStatus,
        engines::{EngineKind, progress_channel, recognition_engine_for_kind},
        ocr_process,
    },
    ui::{ProgressConfig, Ui},
};

/// Extract command line arguments.
#[derive(Debug, Args)]
pub struct ExtractOpts {
    /// The image to read.
    pub image_path: PathBuf,

    /// The recognition engine to use.
    #[clap(long, value_enum, default_value = "tesseract", env = "OCR_ENGINE")]
    pub engine: EngineKind,

    /// The language to recognize.
    #[clap(long, default_value = DEFAULT_LANGUAGE, env = "OCR_LANGUAGE")]
    pub language: String,

    /// Where to write the JSON result. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.image_path.display()))]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let data = tokio::fs::read(&opts.image_path)
        .await
        .with_context(|| format!("cannot read {:?}", opts.image_path))?;
    let file_name = opts
        .image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = mime_guess::from_path(&opts.image_path).first_or_octet_stream();
    let payload = JobPayload::from_image(&file_name, mime_type.essence_str(), &data);
    let engine = recognition_engine_for_kind(opts.engine);

    // Show the engine's progress events on a progress bar.
    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔎",
            msg: "Recognizing text",
            done_msg: "Recognized text",
        },
        100,
    );
    let (tx, rx) = progress_channel();
    let show_progress = rx.for_each(|event| {
        pb.set_message(event.status);
        pb.set_position((event.progress.clamp(0.0, 1.0) * 100.0).round() as u64);
        future::ready(())
    });
    let (result, ()) = futures::join!(
        ocr_process(engine.as_ref(), &opts.language, payload, Some(tx)),
        show_progress,
    );
    drop(pb);

    write_json_output(opts.output_path.as_deref(), &result).await?;
    if result.status == OcrStatus::Failed {
        return Err(anyhow!("could not extract text from {:?}", opts.image_path));
    }
    Ok(())
}
