//! Loading and rendering for the envelope inspector.

use anyhow::{Context, Result};
use carapace_engine::DecodeLimits;
use carapace_engine::inspect::{EnvelopeSummary, describe};
use std::fs;
use std::path::Path;

/// Reads envelope bytes from `path`. With `hex`, the file holds hex text;
/// whitespace is ignored.
pub fn load_input(path: &Path, hex: bool) -> Result<Vec<u8>> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if !hex {
        return Ok(raw);
    }
    let text: String = String::from_utf8(raw)
        .context("hex input is not utf-8")?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(&text).context("invalid hex input")
}

pub fn inspect(bytes: &[u8], limits: &DecodeLimits) -> Result<EnvelopeSummary> {
    describe(bytes, limits).context("failed to read envelope")
}

pub fn render(summary: &EnvelopeSummary, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(summary)?)
    } else {
        Ok(summary.to_string())
    }
}
