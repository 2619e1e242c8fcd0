//! Backup file naming.
//!
//! Artifacts are named `<label>[--<hash>]--<YYYY-MM-DD>--<HH-MM-SS><ext>` where
//! the extension is `.sql`, `.sql.gz` or `.tgz`.

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Short or full commit hash
static HASH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{6,40}$").expect("Invalid hash regex"));

const SEPARATOR: &str = "--";

/// Recognised artifact extensions, longest first.
pub const EXTENSIONS: &[&str] = &[".sql.gz", ".sql", ".tgz"];

/// The parts of a backup file name without its extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupName {
    /// Free-form label, usually the configuration name or a commit
    pub label: String,
    /// Short commit hash; empty when none was recorded
    pub hash: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH-MM-SS`
    pub time: String,
}

impl BackupName {
    /// A name stamped with the given moment.
    pub fn at(label: impl Into<String>, hash: impl Into<String>, moment: DateTime<Local>) -> Self {
        Self {
            label: label.into(),
            hash: hash.into(),
            date: moment.format("%Y-%m-%d").to_string(),
            time: moment.format("%H-%M-%S").to_string(),
        }
    }

    /// A name stamped with the current local time.
    pub fn now(label: impl Into<String>, hash: impl Into<String>) -> Self {
        Self::at(label, hash, Local::now())
    }

    /// Parse a stem (a file name without extension).
    pub fn parse_stem(stem: &str) -> Option<Self> {
        let tokens: Vec<&str> = stem.split(SEPARATOR).collect();
        if tokens.len() < 3 {
            return None;
        }

        let (prefix, stamp) = tokens.split_at(tokens.len() - 2);
        let (date, time) = (stamp[0], stamp[1]);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
        NaiveTime::parse_from_str(time, "%H-%M-%S").ok()?;

        let (label, hash) = match prefix.split_last() {
            Some((last, rest)) if !rest.is_empty() && HASH_REGEX.is_match(last) => {
                (rest.join(SEPARATOR), last.to_string())
            }
            _ => (prefix.join(SEPARATOR), String::new()),
        };

        Some(Self {
            label,
            hash,
            date: date.to_string(),
            time: time.to_string(),
        })
    }

    /// The name without extension.
    pub fn stem(&self) -> String {
        let mut parts = vec![self.label.as_str()];
        if !self.hash.is_empty() {
            parts.push(&self.hash);
        }
        parts.push(&self.date);
        parts.push(&self.time);
        parts.join(SEPARATOR)
    }

    /// The full file name with an extension such as `.sql.gz`.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}{}", self.stem(), extension)
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// Split a file name into stem and recognised extension.
pub fn split_extension(file_name: &str) -> Option<(&str, &'static str)> {
    EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext).map(|stem| (stem, *ext)))
}

/// A parsed artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    /// Name parts
    pub name: BackupName,
    /// Extension including the leading dot
    pub extension: &'static str,
}

impl ParsedFile {
    /// Parse a full file name.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, extension) = split_extension(file_name)?;
        Some(Self {
            name: BackupName::parse_stem(stem)?,
            extension,
        })
    }

    /// True for gzip-compressed artifacts.
    pub fn zipped(&self) -> bool {
        self.extension.ends_with(".gz") || self.extension == ".tgz"
    }

    /// Re-serialize the file name.
    pub fn file_name(&self) -> String {
        self.name.file_name(self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_labelled_dump() {
        let file = "release-42--2024-01-15--10-30-00.sql.gz";
        let parsed = ParsedFile::parse(file).unwrap();

        assert_eq!(parsed.name.label, "release-42");
        assert_eq!(parsed.name.hash, "");
        assert_eq!(parsed.name.date, "2024-01-15");
        assert_eq!(parsed.name.time, "10-30-00");
        assert!(parsed.zipped());
        assert_eq!(parsed.file_name(), file);
    }

    #[test]
    fn test_parse_with_hash() {
        let parsed = ParsedFile::parse("staging--a1b2c3d--2024-03-01--08-00-05.tgz").unwrap();
        assert_eq!(parsed.name.label, "staging");
        assert_eq!(parsed.name.hash, "a1b2c3d");
        assert_eq!(parsed.extension, ".tgz");
    }

    #[test]
    fn test_label_with_separator_is_kept_whole() {
        let parsed = ParsedFile::parse("feature--login--2024-03-01--08-00-05.sql").unwrap();
        assert_eq!(parsed.name.label, "feature--login");
        assert_eq!(parsed.name.hash, "");
        assert!(!parsed.zipped());
    }

    #[test]
    fn test_single_hex_token_is_a_label() {
        let parsed = ParsedFile::parse("cafe12--2024-03-01--08-00-05.sql").unwrap();
        assert_eq!(parsed.name.label, "cafe12");
        assert_eq!(parsed.name.hash, "");
    }

    #[test]
    fn test_rejects_foreign_files() {
        for file in [
            "notes.txt",
            "dump.sql",
            "site--2024-13-01--10-30-00.sql",
            "site--2024-01-01--25-00-00.sql",
            "site--2024-01-01.sql",
        ] {
            assert_eq!(ParsedFile::parse(file), None, "{file}");
        }
    }

    #[test]
    fn test_stamp_from_moment() {
        let moment = Local.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let name = BackupName::at("live", "", moment);
        assert_eq!(name.file_name(".sql"), "live--2024-01-15--10-30-00.sql");
        assert_eq!(
            BackupName::at("live", "abc1234", moment).to_string(),
            "live--abc1234--2024-01-15--10-30-00"
        );
    }
}
