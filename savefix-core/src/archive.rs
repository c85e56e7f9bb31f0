//! Save-container I/O: extraction, payload discovery, backup, repack.
//!
//! Everything here is a thin wrapper around the filesystem and the zip
//! container; no patching logic lives in this module.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::{Result, SaveFixError};

/// Directory a save is unpacked into: a sibling named after the file
/// stem.
pub fn extract_dir_for(save_path: &Path) -> Result<PathBuf> {
    let stem = save_path.file_stem().ok_or_else(|| {
        SaveFixError::Config(format!(
            "save path has no file name: {}",
            save_path.display()
        ))
    })?;
    let dir = save_path.with_file_name(stem);
    if dir == save_path {
        return Err(SaveFixError::Config(format!(
            "save file needs an extension so it can be unpacked next to itself: {}",
            save_path.display()
        )));
    }
    Ok(dir)
}

/// Unpack the save container into its extraction directory and return
/// that directory.
pub fn extract_save(save_path: &Path) -> Result<PathBuf> {
    let extract_dir = extract_dir_for(save_path)?;
    info!(path = %extract_dir.display(), "extracting save");

    let file = File::open(save_path)?;
    let mut archive = ZipArchive::new(file)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let outpath = extract_dir.join(entry.mangled_name());

        if entry.name().ends_with('/') {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
            debug!(name = entry.name(), "extracted");
        }
    }

    Ok(extract_dir)
}

/// True for file names the patcher should inspect: `level.dat` and its
/// numbered chunks, but not the metadata sidecar or `.bin` siblings.
pub fn is_payload_name(name: &str) -> bool {
    name.starts_with("level.dat") && !name.ends_with(".datmetadata") && !name.ends_with(".bin")
}

/// All payload files under `root`, in a stable order.
pub fn find_payload_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_payload_name(&name) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Rename the original save to `<name>.bak`, replacing a stale backup.
pub fn backup_save(save_path: &Path) -> Result<PathBuf> {
    let mut backup = save_path.as_os_str().to_owned();
    backup.push(".bak");
    let backup = PathBuf::from(backup);

    info!(path = %backup.display(), "backing up original save");
    fs::rename(save_path, &backup)?;
    Ok(backup)
}

/// Rebuild the save container from the extracted tree, deflating every
/// file, with entry names relative to `extract_dir`.
pub fn repack_save(extract_dir: &Path, save_path: &Path) -> Result<()> {
    info!(path = %save_path.display(), "repacking save");

    let file = File::create(save_path)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(extract_dir) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry.path().strip_prefix(extract_dir).map_err(|_| {
            SaveFixError::Config(format!(
                "file {} is outside the extracted tree",
                entry.path().display()
            ))
        })?;
        let name = zip_entry_name(rel);

        writer.start_file(&name, options)?;
        let mut src = File::open(entry.path())?;
        io::copy(&mut src, &mut writer)?;
        debug!(name = %name, "repacked");
    }

    writer.finish()?;
    Ok(())
}

/// Zip entry names always use forward slashes.
fn zip_entry_name(rel: &Path) -> String {
    rel.iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
