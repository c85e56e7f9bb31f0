//! Locates and conditionally clears achievement-disabling flag bytes
//! inside the zlib-compressed `level.dat*` payloads of a Factorio save
//! container.
//!
//! The payload layout is not modeled; buffers are treated as opaque
//! byte sequences and the flags are found purely through the local
//! heuristics in [`engine`]. Container handling, payload discovery and
//! the zlib codec are thin collaborators around that engine.

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub mod archive;
pub mod engine;
pub mod hexdump;
pub mod rules;

use engine::MatchOutcome;
use rules::PatchRule;

#[derive(Debug, Error)]
pub enum SaveFixError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to parse rule catalog: {0}")]
    RuleParse(#[from] serde_json::Error),
    #[error("invalid rule '{name}': {reason}")]
    Rule { name: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, SaveFixError>;

/// Everything one invocation needs to know. `apply` false means dry
/// run: report what would change, mutate nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSettings {
    pub save_path: PathBuf,
    pub apply: bool,
    pub rules_path: Option<PathBuf>,
    pub keep_extracted: bool,
    pub debug: bool,
}

/// What a run did, for callers that want to report it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Payload files discovered in the extracted save.
    pub payloads_found: usize,
    /// Payload files actually rewritten (always 0 on a dry run).
    pub payloads_patched: usize,
    /// Flag bytes confirmed at 0x01, whether cleared or dry-run only.
    pub targets_confirmed: usize,
    /// True when the original was backed up and the save repacked.
    pub repacked: bool,
}

/// Inflate one payload file. Failure here is fatal for the file, not
/// for the batch.
fn decompress_payload(raw: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(raw);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn compress_payload(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Scan one payload file, rewrite it in place when apply mode cleared
/// something, and append its audit lines to `patch_log`.
///
/// Returns the number of confirmed flag bytes and whether the file was
/// rewritten.
fn patch_payload_file(
    path: &Path,
    rules: &[PatchRule],
    apply: bool,
    patch_log: &mut String,
) -> Result<(usize, bool)> {
    info!(path = %path.display(), "scanning payload");

    let compressed = fs::read(path)?;
    let mut data = decompress_payload(&compressed)?;

    let report = engine::scan_and_patch(&mut data, rules, apply);

    let mut confirmed = 0usize;
    for m in &report.matches {
        let sentinel = match m.sentinel_index {
            Some(index) => index.to_string(),
            None => "-".to_string(),
        };
        patch_log.push_str(&format!(
            "{}: rule={} marker_index={} sentinel_index={} outcome={:?}\n",
            path.display(),
            m.rule,
            m.marker_index,
            sentinel,
            m.outcome,
        ));
        if !m.context.is_empty() {
            patch_log.push_str(&m.context);
        }
        if matches!(m.outcome, MatchOutcome::Patched { .. }) {
            confirmed += 1;
        }
    }

    if report.modified {
        let recompressed = compress_payload(&data)?;
        fs::write(path, recompressed)?;
        info!(path = %path.display(), "payload patched and rewritten");
        return Ok((confirmed, true));
    }

    if !apply && confirmed > 0 {
        info!(path = %path.display(), count = confirmed, "dry run: flags that would be cleared");
    }
    Ok((confirmed, false))
}

fn patch_log_path(save_path: &Path) -> PathBuf {
    let stem = match save_path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => "save".to_string(),
    };
    save_path.with_file_name(format!("{stem}_patch_log.txt"))
}

pub fn run(settings: PatchSettings) -> Result<RunSummary> {
    if !settings.save_path.exists() {
        return Err(SaveFixError::Config(format!(
            "save file does not exist: {}",
            settings.save_path.display()
        )));
    }

    let rules = match &settings.rules_path {
        Some(path) => rules::load_rules(path)?,
        None => rules::builtin_rules(),
    };

    let extract_dir = archive::extract_save(&settings.save_path)?;
    let payloads = archive::find_payload_files(&extract_dir)?;
    info!(count = payloads.len(), "payload files found");
    if payloads.is_empty() {
        warn!("no level.dat payloads under the extracted save");
    }

    let mut summary = RunSummary {
        payloads_found: payloads.len(),
        ..Default::default()
    };
    let mut patch_log = String::new();

    for path in &payloads {
        match patch_payload_file(path, &rules, settings.apply, &mut patch_log) {
            Ok((confirmed, rewritten)) => {
                summary.targets_confirmed += confirmed;
                if rewritten {
                    summary.payloads_patched += 1;
                }
            }
            Err(err) => {
                // A payload that fails to decode is skipped; the rest of
                // the batch continues.
                warn!(path = %path.display(), error = %err, "skipping payload");
                patch_log.push_str(&format!("{}: skipped ({})\n", path.display(), err));
            }
        }
    }

    if settings.apply && summary.payloads_patched > 0 {
        archive::backup_save(&settings.save_path)?;
        archive::repack_save(&extract_dir, &settings.save_path)?;
        summary.repacked = true;
    } else {
        info!("no changes committed; original save left untouched");
    }

    if settings.keep_extracted {
        info!(path = %extract_dir.display(), "keeping extracted directory");
    } else {
        fs::remove_dir_all(&extract_dir)?;
    }

    if settings.debug {
        let log_path = patch_log_path(&settings.save_path);
        fs::write(&log_path, &patch_log)?;
        info!(path = %log_path.display(), "patch log written");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_codec_is_zlib_not_gzip() {
        let compressed = compress_payload(b"level payload bytes").unwrap();
        // A zlib stream starts with the 0x78 CMF byte; a gzip stream
        // would start with 0x1F 0x8B.
        assert_eq!(compressed[0], 0x78);
        assert_eq!(
            decompress_payload(&compressed).unwrap(),
            b"level payload bytes"
        );
    }

    #[test]
    fn garbage_payload_fails_to_decompress() {
        assert!(decompress_payload(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }

    #[test]
    fn missing_save_path_is_a_config_error() {
        let settings = PatchSettings {
            save_path: PathBuf::from("/nonexistent/save.zip"),
            apply: false,
            rules_path: None,
            keep_extracted: false,
            debug: false,
        };
        let err = run(settings).unwrap_err();
        assert!(matches!(err, SaveFixError::Config(_)));
    }

    #[test]
    fn patch_log_lands_next_to_the_save() {
        let path = patch_log_path(Path::new("/saves/mybase.zip"));
        assert_eq!(path, Path::new("/saves/mybase_patch_log.txt"));
    }
}
