//! The `upload` subcommand.

use clap::Args;

use crate::{
    client::{ClientSession, ClientState, OcrClient, SelectedImage},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Upload command line arguments.
#[derive(Debug, Args)]
pub struct UploadOpts {
    /// The image to upload.
    pub image_path: PathBuf,

    /// The base URL of the OCR server.
    #[clap(long, env = "OCR_SERVER", default_value = "http://127.0.0.1:3000")]
    pub server: String,

    /// Save the extracted text as `extracted-text.txt` in this directory.
    #[clap(long, value_name = "DIR")]
    pub download: Option<PathBuf>,
}

/// The `upload` subcommand.
#[instrument(level = "debug", skip_all, fields(path = %opts.image_path.display()))]
pub async fn cmd_upload(ui: Ui, opts: &UploadOpts) -> Result<()> {
    let mut session = ClientSession::new();
    let image = SelectedImage::from_path(&opts.image_path).await?;
    if !session.select(image) {
        return Err(session_error(&session));
    }
    if let Some(image) = session.image() {
        debug!(
            file_name = %image.file_name,
            mime_type = %image.mime_type,
            size = image.data.len(),
            "Selected image"
        );
    }

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "📤",
        msg: "Extracting text",
        done_msg: "Extracted text",
    });
    OcrClient::new(&opts.server).extract(&mut session).await?;
    drop(spinner);

    let Some(display) = session.display() else {
        return Err(session_error(&session));
    };
    ui.display_message("📊", &display.confidence_label);
    println!("{}", display.text);

    if let Some(dir) = &opts.download {
        match session.download() {
            Some(file) => {
                let path = dir.join(file.file_name);
                tokio::fs::write(&path, file.contents)
                    .await
                    .with_context(|| format!("cannot write {:?}", path))?;
                ui.display_message("💾", &format!("Saved {}", path.display()));
            }
            None => warn!("No text to download"),
        }
    }
    Ok(())
}

/// Turn an error state into an error.
fn session_error(session: &ClientSession) -> anyhow::Error {
    match session.state() {
        ClientState::ErrorShown(message) => anyhow!("{}", message),
        state => anyhow!("unexpected client state: {:?}", state),
    }
}
