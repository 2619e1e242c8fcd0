//! Backup catalog
//!
//! Each capability that produces backups lists its own artifacts from the
//! host's `backupFolder`; the [`Catalog`] merges them, sorts them by date and
//! time, and resolves an identifier (label or hash) to every artifact of one
//! point-in-time backup.

pub mod name;

pub use name::{BackupName, ParsedFile};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::executor::{RunOptions, Shell};

/// One artifact on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH-MM-SS`
    pub time: String,
    /// Commit or label; may be empty
    pub commit: String,
    /// Short hash; may be empty
    pub hash: String,
    /// Capability that produced the artifact
    pub method: String,
    /// File name inside the backup folder
    pub file: String,
    /// True for gzip-compressed artifacts
    pub zipped: bool,
}

impl BackupRecord {
    /// Build a record from a file name, if it follows the naming convention.
    pub fn from_file_name(method: impl Into<String>, file: &str) -> Option<Self> {
        let parsed = ParsedFile::parse(file)?;
        Some(Self {
            zipped: parsed.zipped(),
            date: parsed.name.date,
            time: parsed.name.time,
            commit: parsed.name.label,
            hash: parsed.name.hash,
            method: method.into(),
            file: file.to_string(),
        })
    }

    /// Key shared by all artifacts of one backup.
    ///
    /// The hash (or the label when there is none) plus the timestamp, so two
    /// backups taken at the same commit stay apart.
    pub fn group_key(&self) -> String {
        let id = if self.hash.is_empty() {
            &self.commit
        } else {
            &self.hash
        };
        format!("{}--{}--{}", id, self.date, self.time)
    }
}

/// Glob patterns a method's artifacts match.
pub struct ArtifactPatterns {
    method: String,
    set: GlobSet,
}

impl ArtifactPatterns {
    /// Compile patterns such as `*.sql.gz` for one method.
    pub fn new(method: impl Into<String>, patterns: &[&str]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| Error::invalid_config(*pattern, e.to_string()))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build glob set: {}", e)))?;
        Ok(Self {
            method: method.into(),
            set,
        })
    }

    /// Records for every listed file that matches and parses.
    pub fn records<'a, I>(&self, listing: I) -> Vec<BackupRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        listing
            .into_iter()
            .map(str::trim)
            .filter(|file| !file.is_empty() && self.set.is_match(file))
            .filter_map(|file| {
                let record = BackupRecord::from_file_name(&self.method, file);
                if record.is_none() {
                    debug!(file = %file, method = %self.method, "Skipping file with foreign name");
                }
                record
            })
            .collect()
    }
}

/// List a remote folder once and return one file name per line.
pub async fn list_folder(shell: &Shell, folder: &str) -> Result<Vec<String>> {
    let result = shell
        .run(
            &format!("ls -1 {}", shell_words::quote(folder)),
            RunOptions::best_effort(),
        )
        .await?;
    if !result.success {
        warn!(folder = %folder, "Backup folder could not be listed");
        return Ok(Vec::new());
    }
    Ok(result.stdout.lines().map(str::to_string).collect())
}

/// List one method's artifacts in a remote folder.
pub async fn list_artifacts(
    shell: &Shell,
    folder: &str,
    method: &str,
    patterns: &[&str],
) -> Result<Vec<BackupRecord>> {
    let listing = list_folder(shell, folder).await?;
    let patterns = ArtifactPatterns::new(method, patterns)?;
    Ok(patterns.records(listing.iter().map(String::as_str)))
}

/// Sorted view over every artifact on a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    records: Vec<BackupRecord>,
}

impl Catalog {
    /// Build a catalog; records are sorted by date then time.
    pub fn new(mut records: Vec<BackupRecord>) -> Self {
        records.sort_by(|a, b| (&a.date, &a.time).cmp(&(&b.date, &b.time)));
        Self { records }
    }

    /// Records in ascending order
    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    /// True if nothing was found
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record of the backup an identifier names.
    ///
    /// The latest record whose commit equals the identifier decides the
    /// backup; failing that, the latest record whose hash equals it. The
    /// result holds every record of that one backup, across methods.
    pub fn find(&self, identifier: &str) -> Result<Vec<BackupRecord>> {
        let not_found = || Error::BackupNotFound {
            identifier: identifier.to_string(),
        };
        if identifier.is_empty() {
            return Err(not_found());
        }

        let key = self
            .records
            .iter()
            .rev()
            .find(|record| record.commit == identifier)
            .or_else(|| {
                self.records
                    .iter()
                    .rev()
                    .find(|record| record.hash == identifier)
            })
            .map(BackupRecord::group_key)
            .ok_or_else(not_found)?;

        Ok(self
            .records
            .iter()
            .filter(|record| record.group_key() == key)
            .cloned()
            .collect())
    }

    /// Rows for display, with dates repeated from the previous row blanked.
    pub fn display_rows(&self) -> Vec<DisplayRow> {
        let mut last_date = None;
        self.records
            .iter()
            .map(|record| {
                let date = if last_date == Some(&record.date) {
                    String::new()
                } else {
                    last_date = Some(&record.date);
                    record.date.clone()
                };
                DisplayRow {
                    date,
                    time: record.time.clone(),
                    commit: record.commit.clone(),
                    method: record.method.clone(),
                    file: record.file.clone(),
                }
            })
            .collect()
    }
}

/// One formatted catalog line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayRow {
    /// Date, blank when equal to the previous row's
    pub date: String,
    /// Time
    pub time: String,
    /// Commit or label
    pub commit: String,
    /// Producing method
    pub method: String,
    /// File name
    pub file: String,
}

impl std::fmt::Display for DisplayRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:<10} {}  |  {:<30}  |  {:<10}  |  {}",
            self.date, self.time, self.commit, self.method, self.file
        )
    }
}
