use anyhow::{Context, Result};
use base64::Engine;
use gemini_live_types::Blob;
use std::fs;
use std::path::Path;

/// Largest file accepted for `--upload`.
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

/// Reads a file into an inline media blob for the live channel.
pub fn load_upload(path: &Path) -> Result<Blob> {
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to read upload: {}", path.display()))?
        .len();
    if size > MAX_UPLOAD_BYTES {
        anyhow::bail!(
            "Upload {} is {} bytes, the limit is {}",
            path.display(),
            size,
            MAX_UPLOAD_BYTES
        );
    }
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read upload: {}", path.display()))?;
    Ok(Blob::new(
        mime_type(path),
        base64::engine::general_purpose::STANDARD.encode(bytes),
    ))
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}
