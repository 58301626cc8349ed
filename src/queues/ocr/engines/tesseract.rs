//! Tesseract OCR engine.

use std::sync::LazyLock;

use regex::Regex;
use tokio::{fs, process::Command};

use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

use super::{Recognition, RecognitionEngine, RecognitionInput};

/// Errors printed by `tesseract` that don't always produce a non-zero exit
/// code.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\berror\b").expect("failed to compile regex"));

/// Leptonica, the image library used by `tesseract`, prints `Error in
/// <function>: ...` for problems it recovers from.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Error in \w+:").expect("failed to compile regex")
});

/// Does this line of `tesseract` output contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// OCR engine wrapping the `tesseract` CLI tool.
#[non_exhaustive]
#[derive(Debug, Default)]
pub struct TesseractEngine {}

impl TesseractEngine {
    /// Create a new `tesseract` engine.
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(language = %input.language))]
    async fn recognize(&self, input: RecognitionInput) -> Result<Recognition> {
        input.report_progress("loading image", 0.0);

        // Don't trust the declared MIME type. Look at the actual bytes, and
        // refuse anything which isn't an image.
        let kind = infer::get(&input.image)
            .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
            .ok_or_else(|| anyhow!("image data is not in a recognized image format"))?;
        debug!(mime_type = kind.mime_type(), "Detected image format");

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{}", kind.extension()));
        let output_base = tmpdir.path().join("output");
        fs::write(&input_path, &input.image)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract, asking for both plain text and TSV output. The TSV
        // has per-word confidence scores.
        input.report_progress("recognizing text", 0.5);
        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&input_path)
                .arg(&output_base)
                .arg("-l")
                .arg(&input.language)
                .arg("txt")
                .arg("tsv")
                .output()
                .await
                .context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, Some(&is_error_line))?;

        // Read the output files.
        let text = fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract text output")?;
        let tsv = fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract TSV output")?;
        let confidence = mean_word_confidence(&tsv)?;

        input.report_progress("done", 1.0);
        Ok(Recognition { text, confidence })
    }
}

/// The TSV `level` of a single word.
const WORD_LEVEL: &str = "5";

/// Compute the mean confidence of all words in Tesseract's TSV output.
///
/// Rows which aren't words have a confidence of `-1`, and are skipped. An
/// image with no words at all has a confidence of 0.
fn mean_word_confidence(tsv: &str) -> Result<f64> {
    let mut lines = tsv.lines();
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("tesseract TSV output is empty"))?;
    let columns = header.split('\t').collect::<Vec<_>>();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| anyhow!("tesseract TSV output has no {:?} column", name))
    };
    let level_idx = column("level")?;
    let conf_idx = column("conf")?;

    let mut total = 0.0;
    let mut count = 0usize;
    for line in lines {
        let fields = line.split('\t').collect::<Vec<_>>();
        if fields.get(level_idx) != Some(&WORD_LEVEL) {
            continue;
        }
        let Some(conf) = fields.get(conf_idx) else {
            continue;
        };
        let conf = conf
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid tesseract confidence: {:?}", conf))?;
        if conf >= 0.0 {
            total += conf;
            count += 1;
        }
    }

    if count == 0 {
        Ok(0.0)
    } else {
        Ok(total / count as f64)
    }
}
