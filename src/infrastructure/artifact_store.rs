use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::domain::error::{AppError, Result};

/// On-disk layout for run artifacts, rooted under the data dir.
///
/// Each run gets its own directory so artifacts can be written, hashed,
/// and cleaned up as a unit without touching other runs.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
    runs: PathBuf,
}

impl ArtifactLayout {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.to_path_buf(),
            runs: data_dir.join("runs"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.runs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs.join(run_id)
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::IoError(format!("Cannot create {}: {e}", path.display())))
}

/// Write bytes through a temp file in the same directory, then rename
/// into place. An existing destination is parked aside first so a crash
/// mid-replace never leaves a torn file behind.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let nonce = Uuid::new_v4();
    let staged = path.with_extension(format!("tmp-{nonce}"));
    let write = fs::File::create(&staged)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .map_err(|e| AppError::IoError(format!("Cannot stage {}: {e}", staged.display())));
    if let Err(e) = write {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }

    let parked = if path.exists() {
        let parked = path.with_extension(format!("bak-{nonce}"));
        fs::rename(path, &parked).map_err(|e| {
            AppError::IoError(format!("Cannot park {}: {e}", path.display()))
        })?;
        Some(parked)
    } else {
        None
    };

    fs::rename(&staged, path).map_err(|e| {
        AppError::IoError(format!(
            "Cannot move {} into place: {e}",
            staged.display()
        ))
    })?;
    if let Some(parked) = parked {
        let _ = fs::remove_file(parked);
    }
    Ok(())
}

pub fn sha256_hex_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .map_err(|e| AppError::IoError(format!("Cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| AppError::IoError(format!("Cannot hash {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn dir_size_bytes(dir: &Path) -> Result<u64> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::IoError(format!("Cannot read {}: {e}", dir.display())))?;
    let mut total = 0u64;
    for entry in entries {
        let entry =
            entry.map_err(|e| AppError::IoError(format!("Bad entry in {}: {e}", dir.display())))?;
        let meta = entry.metadata().map_err(|e| {
            AppError::IoError(format!("Cannot stat {}: {e}", entry.path().display()))
        })?;
        total += if meta.is_dir() {
            dir_size_bytes(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

#[derive(Debug, Clone)]
pub struct RunRetentionPolicy {
    pub max_age_days: u64,
    pub max_runs: usize,
}

#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub deleted_run_ids: Vec<String>,
    pub freed_bytes: u64,
}

/// Best-effort removal of run directories that are both unprotected and
/// either older than the policy allows or past the run-count limit.
/// `protected_run_ids` should include the run currently being served.
pub fn cleanup_old_runs(
    layout: &ArtifactLayout,
    policy: &RunRetentionPolicy,
    protected_run_ids: &HashSet<String>,
) -> Result<CleanupReport> {
    let max_age = Duration::from_secs(policy.max_age_days * 86_400);
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let runs_dir = layout.runs_dir();
    let mut candidates: Vec<(String, SystemTime)> = Vec::new();
    let entries = fs::read_dir(runs_dir)
        .map_err(|e| AppError::IoError(format!("Cannot read {}: {e}", runs_dir.display())))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| AppError::IoError(format!("Bad entry in {}: {e}", runs_dir.display())))?;
        let meta = entry.metadata().map_err(|e| {
            AppError::IoError(format!("Cannot stat {}: {e}", entry.path().display()))
        })?;
        if meta.is_dir() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((entry.file_name().to_string_lossy().into_owned(), modified));
        }
    }

    // Newest first; index past max_runs means over the count limit.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    let mut report = CleanupReport {
        deleted_run_ids: Vec::new(),
        freed_bytes: 0,
    };
    for (rank, (run_id, modified)) in candidates.into_iter().enumerate() {
        if protected_run_ids.contains(&run_id) {
            continue;
        }
        let expired = modified < cutoff;
        if !expired && rank < policy.max_runs {
            continue;
        }
        let run_dir = layout.run_dir(&run_id);
        let size = dir_size_bytes(&run_dir).unwrap_or(0);
        if fs::remove_dir_all(&run_dir).is_ok() {
            report.freed_bytes += size;
            report.deleted_run_ids.push(run_id);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");

        atomic_write_bytes(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write_bytes(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp or backup droppings left behind.
        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn test_sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash.txt");
        atomic_write_bytes(&path, b"abc").unwrap();
        assert_eq!(
            sha256_hex_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_cleanup_respects_protected_runs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        layout.ensure().unwrap();
        fs::create_dir_all(layout.run_dir("keep")).unwrap();
        fs::create_dir_all(layout.run_dir("drop")).unwrap();

        let policy = RunRetentionPolicy {
            max_age_days: 365,
            max_runs: 0,
        };
        let protected: HashSet<String> = ["keep".to_string()].into_iter().collect();
        let report = cleanup_old_runs(&layout, &policy, &protected).unwrap();

        assert_eq!(report.deleted_run_ids, vec!["drop".to_string()]);
        assert!(layout.run_dir("keep").exists());
        assert!(!layout.run_dir("drop").exists());
    }
}
