use anyhow::{Context, Result};
use companion_core::personality::Personality;
use std::fs;
use std::path::Path;

pub fn load_personality(path: &Path) -> Result<Personality> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read personality file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid personality file: {}", path.display()))
}

/// Writes the personality as pretty JSON, replacing any existing file.
pub fn export_personality(path: &Path, personality: &Personality) -> Result<()> {
    let json = serde_json::to_string_pretty(personality)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write personality file: {}", path.display()))
}
