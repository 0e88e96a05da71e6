//
// discovery.rs
// Dicom-Anonymizer-rs
//
// Groups an input directory into imaging sessions: one per first-level sub-folder, DICOM files only.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// One patient folder. Every file in it is assumed to belong to the same
/// patient; nothing checks this, the folder layout is trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagingSession {
    pub session_id: String,
    pub root: PathBuf,
    /// DICOM files, relative to `root`, in path order.
    pub files: Vec<PathBuf>,
    /// Files left behind: DICOMDIR indexes and anything without the DICOM preamble.
    pub skipped: Vec<PathBuf>,
}

/// Whether the file carries the `DICM` magic after the 128-byte preamble.
pub fn is_dicom_file(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() < 132 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(128))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    Ok(&magic == b"DICM")
}

fn is_dicomdir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.eq_ignore_ascii_case("DICOMDIR"))
}

fn scan_session(session_id: String, root: PathBuf) -> Result<ImagingSession> {
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(session = %session_id, error = %err, "unreadable entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry.path().to_path_buf());
        if !is_dicomdir(entry.path()) && is_dicom_file(entry.path())? {
            files.push(relative);
        } else {
            skipped.push(relative);
        }
    }
    debug!(session = %session_id, files = files.len(), skipped = skipped.len(), "scanned session");
    Ok(ImagingSession {
        session_id,
        root,
        files,
        skipped,
    })
}

/// Sessions under `root`, sorted by session id.
pub fn discover_sessions(root: &Path) -> Result<Vec<ImagingSession>> {
    let mut dirs: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            debug!(path = %entry.path().display(), "ignoring loose file at input root");
            continue;
        }
        let session_id = entry.file_name().to_string_lossy().into_owned();
        dirs.push((session_id, entry.path()));
    }
    dirs.sort();

    dirs.into_iter()
        .map(|(session_id, path)| scan_session(session_id, path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dicom_stub(path: &Path) {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn one_session_per_subfolder_with_dicom_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("B_session");
        let a = dir.path().join("A_session").join("series1");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        write_dicom_stub(&a.join("img1"));
        write_dicom_stub(&b.join("x.dcm"));
        write_dicom_stub(&b.join("DICOMDIR"));
        fs::write(b.join("report.pdf"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("notes.txt"), b"loose").unwrap();

        let sessions = discover_sessions(dir.path()).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "A_session");
        assert_eq!(sessions[0].files, vec![PathBuf::from("series1/img1")]);
        assert_eq!(sessions[1].files, vec![PathBuf::from("x.dcm")]);
        assert_eq!(sessions[1].skipped.len(), 2);
    }

    #[test]
    fn short_files_are_not_dicom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny");
        fs::write(&path, b"DICM").unwrap();
        assert!(!is_dicom_file(&path).unwrap());
    }
}
