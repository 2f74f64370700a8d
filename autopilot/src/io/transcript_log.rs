//! Persisted transcripts under `.autopilot/transcripts/`.
//!
//! These are product artifacts, written regardless of `RUST_LOG`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::transcript::Transcript;
use crate::io::atomic::write_atomic;

pub fn write_transcript(path: &Path, transcript: &Transcript) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(transcript).context("serialize transcript")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub fn load_transcript(path: &Path) -> Result<Transcript> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read transcript {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse transcript {}", path.display()))
}
