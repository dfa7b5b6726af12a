use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;
use tokio::fs;

use crate::util::random_string;

const DEFAULT_EXTENSION: &str = "webm";

/// Writes an uploaded file to `dir` under a fresh name made of the current
/// timestamp and a random suffix. The extension of `original_name` is kept.
pub async fn save_upload(dir: &Path, original_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    let file_name = format!(
        "{}-{}.{}",
        Utc::now().timestamp_millis(),
        random_string(8).to_lowercase(),
        extension_of(original_name)
    );

    let path = dir.join(file_name);
    fs::write(&path, bytes).await?;

    info!("Saved upload {} ({} bytes)", path.display(), bytes.len());

    Ok(path)
}

/// Only short alphanumeric extensions are kept, anything else becomes the default
fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
