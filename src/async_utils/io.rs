//! I/O utilities.
//!
//! This module is responsible for reading JSON and TOML files, and for writing
//! JSON to either a file or standard output.

use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Read TOML or JSON from a file. The format is chosen by extension, and
/// anything other than `.json` is treated as TOML.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to open file at path: {:?}", path))?;
    let mut data = String::new();
    // Read all at once because our parsing libraries don't do async I/O.
    file.read_to_string(&mut data)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a single value as pretty-printed JSON to either standard output or a
/// file.
pub async fn write_json_output<T>(path: Option<&Path>, value: &T) -> Result<()>
where
    T: Serialize,
{
    let mut writer = BufWriter::new(create_writer(path).await?);
    let json =
        serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to write JSON to output")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline to output")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[tokio::test]
    async fn test_read_json_or_toml_by_extension() {
        let dir = tempfile::TempDir::with_prefix("io-test").unwrap();

        let toml_path = dir.path().join("config.toml");
        tokio::fs::write(&toml_path, "mode = \"poll\"\n").await.unwrap();
        let parsed: BTreeMap<String, String> =
            read_json_or_toml(&toml_path).await.unwrap();
        assert_eq!(parsed["mode"], "poll");

        let json_path = dir.path().join("config.json");
        tokio::fs::write(&json_path, r#"{"mode": "blocking"}"#)
            .await
            .unwrap();
        let parsed: BTreeMap<String, String> =
            read_json_or_toml(&json_path).await.unwrap();
        assert_eq!(parsed["mode"], "blocking");
    }

    #[tokio::test]
    async fn test_write_json_output_to_file() {
        let dir = tempfile::TempDir::with_prefix("io-test").unwrap();
        let path = dir.path().join("out.json");
        write_json_output(Some(&path), &serde_json::json!({ "text": "Hello" }))
            .await
            .unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["text"], "Hello");
    }
}
