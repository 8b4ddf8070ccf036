//! Local history backups for the JSONL export.
//!
//! Before each export the previous `issues.jsonl` is copied into
//! `.tangle/.tg_history/` with a timestamped name, deduplicated against the
//! most recent backup, and rotated by count and age.

use crate::error::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Directory inside `.tangle/` that holds export backups.
pub const HISTORY_DIR_NAME: &str = ".tg_history";

/// Configuration for history backups.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub max_count: usize,
    pub max_age_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: 100,
            max_age_days: 30,
        }
    }
}

/// Metadata for a single backup file.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
}

/// Back up the current JSONL file before an export overwrites it.
///
/// Nothing happens when history is disabled or the target doesn't exist yet.
/// A backup identical to the most recent one for the same stem is skipped.
///
/// # Errors
///
/// Returns an error if the backup copy or rotation fails.
pub fn backup_before_export(
    tangle_dir: &Path,
    config: &HistoryConfig,
    target_path: &Path,
) -> Result<()> {
    if !config.enabled || !target_path.exists() {
        return Ok(());
    }

    let history_dir = tangle_dir.join(HISTORY_DIR_NAME);
    if !history_dir.exists() {
        fs::create_dir_all(&history_dir)?;
    }

    let file_stem = target_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("issues");

    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup_path = history_dir.join(format!("{file_stem}.{timestamp}.jsonl"));

    if let Some(latest) = latest_backup(&history_dir, file_stem)? {
        if files_are_identical(target_path, &latest.path)? {
            tracing::debug!(
                backup = %latest.path.display(),
                "Skipping backup: identical to latest"
            );
            return Ok(());
        }
    }

    fs::copy(target_path, &backup_path)?;
    tracing::debug!(backup = %backup_path.display(), "Created export backup");

    rotate_history(&history_dir, config)
}

/// Delete backups past the configured count or age limits.
fn rotate_history(history_dir: &Path, config: &HistoryConfig) -> Result<()> {
    let backups = list_backups(history_dir)?;
    if backups.is_empty() {
        return Ok(());
    }

    let cutoff = Utc::now() - chrono::Duration::days(i64::from(config.max_age_days));
    let mut deleted = 0usize;

    // list_backups returns newest first, so index doubles as rank
    for (idx, entry) in backups.iter().enumerate() {
        if entry.timestamp < cutoff || idx >= config.max_count {
            fs::remove_file(&entry.path)?;
            deleted += 1;
        }
    }

    if deleted > 0 {
        tracing::debug!(count = deleted, "Pruned old export backups");
    }

    Ok(())
}

/// List backups in a history directory, newest first.
///
/// Files that don't match `<stem>.YYYYMMDD_HHMMSS.jsonl` are ignored.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_backups(history_dir: &Path) -> Result<Vec<BackupEntry>> {
    if !history_dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();

    for entry in fs::read_dir(history_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
        {
            continue;
        }

        // Timestamp is the second-to-last dot-separated component
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 3 {
            continue;
        }
        let ts_str = parts[parts.len() - 2];
        if ts_str.len() != 15 {
            continue;
        }
        let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, "%Y%m%d_%H%M%S") else {
            continue;
        };
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };

        backups.push(BackupEntry {
            path,
            timestamp: Utc.from_utc_datetime(&dt),
            size: metadata.len(),
        });
    }

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(backups)
}

fn latest_backup(history_dir: &Path, stem: &str) -> Result<Option<BackupEntry>> {
    let backups = list_backups(history_dir)?;
    Ok(backups.into_iter().find(|b| {
        b.path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(stem))
    }))
}

/// Byte-level comparison with an early length check.
fn files_are_identical(p1: &Path, p2: &Path) -> Result<bool> {
    let f1 = File::open(p1)?;
    let f2 = File::open(p2)?;

    if f1.metadata()?.len() != f2.metadata()?.len() {
        return Ok(false);
    }

    let mut reader1 = BufReader::new(f1);
    let mut reader2 = BufReader::new(f2);
    let mut buf1 = [0u8; 8192];
    let mut buf2 = [0u8; 8192];

    loop {
        let n1 = reader1.read(&mut buf1)?;
        if n1 == 0 {
            break;
        }

        let mut n2_total = 0;
        while n2_total < n1 {
            let n2 = reader2.read(&mut buf2[n2_total..n1])?;
            if n2 == 0 {
                return Ok(false);
            }
            n2_total += n2;
        }

        if buf1[..n1] != buf2[..n1] {
            return Ok(false);
        }
    }

    Ok(true)
}
