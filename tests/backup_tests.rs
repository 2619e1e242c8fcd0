//! Backup, catalog and restore tests.

mod common;

use pretty_assertions::assert_eq;

use hostwright::backup::{BackupRecord, Catalog};
use hostwright::error::Error;

use common::*;

const LISTING: &str = "\
live--a1b2c3d--2024-01-15--10-30-00.sql.gz
live--a1b2c3d--2024-01-15--10-30-00.tgz
live--2024-01-10--09-00-00.sql.gz
release-42--2024-01-15--08-00-00.sql
notes.txt
live--2024-13-40--99-00-00.sql
";

fn record(commit: &str, hash: &str, date: &str, time: &str, method: &str, file: &str) -> BackupRecord {
    BackupRecord {
        date: date.to_string(),
        time: time.to_string(),
        commit: commit.to_string(),
        hash: hash.to_string(),
        method: method.to_string(),
        file: file.to_string(),
        zipped: file.ends_with(".gz"),
    }
}

#[tokio::test]
async fn test_list_backups_sorted_across_methods() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("ls -1", LISTING);

    let catalog = hw.list_backups(&ctx).await.unwrap();
    let files: Vec<&str> = catalog.records().iter().map(|r| r.file.as_str()).collect();
    assert_eq!(
        files,
        vec![
            "live--2024-01-10--09-00-00.sql.gz",
            "release-42--2024-01-15--08-00-00.sql",
            "live--a1b2c3d--2024-01-15--10-30-00.sql.gz",
            "live--a1b2c3d--2024-01-15--10-30-00.tgz",
        ]
    );

    let rows = catalog.display_rows();
    assert_eq!(rows[1].date, "2024-01-15");
    assert_eq!(rows[2].date, "");
    assert_eq!(rows[3].method, "files");
}

#[tokio::test]
async fn test_missing_backup_folder_lists_nothing() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.fail_on("ls -1", 2, "No such file or directory");

    let catalog = hw.list_backups(&ctx).await.unwrap();
    assert!(catalog.is_empty());
}

#[test]
fn test_identifier_prefers_commit_then_groups_by_hash() {
    let catalog = Catalog::new(vec![
        record("release-42", "a1", "2024-01-15", "10-30-00", "drush", "release-42--a1--2024-01-15--10-30-00.sql.gz"),
        record("", "a1", "2024-01-15", "10-30-00", "files", "a1--2024-01-15--10-30-00.tgz"),
        record("release-41", "b2", "2024-01-10", "10-30-00", "drush", "release-41--b2--2024-01-10--10-30-00.sql.gz"),
    ]);

    let found = catalog.find("release-42").unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|r| r.hash == "a1"));
    assert_eq!(catalog.find("a1").unwrap(), found);

    let by_hash = catalog.find("b2").unwrap();
    assert_eq!(by_hash.len(), 1);
    assert_eq!(by_hash[0].commit, "release-41");

    assert!(matches!(
        catalog.find("release-99"),
        Err(Error::BackupNotFound { identifier }) if identifier == "release-99"
    ));
}

#[tokio::test]
async fn test_restore_imports_then_resets() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("ls -1", LISTING);

    hw.restore(&ctx, "a1b2c3d", false).await.unwrap();

    let commands = mock.commands();
    let import = mock
        .position("zcat /var/backups/site/live--a1b2c3d--2024-01-15--10-30-00.sql.gz")
        .unwrap_or_else(|| panic!("no import in {:?}", commands));
    let untar = mock
        .position("tar -xzf /var/backups/site/live--a1b2c3d--2024-01-15--10-30-00.tgz")
        .unwrap();
    let updb = mock.position("drush updb -y").unwrap();
    assert!(import < updb);
    assert!(untar < updb);
    assert!(!mock.ran("sql-drop"));
}

#[tokio::test]
async fn test_restore_with_cleanup_drops_first() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("ls -1", LISTING);

    hw.restore(&ctx, "release-42", true).await.unwrap();

    let drop = mock.position("drush sql-drop -y").unwrap();
    let import = mock
        .position("drush sql-cli < /var/backups/site/release-42--2024-01-15--08-00-00.sql")
        .unwrap();
    assert!(drop < import);
}

#[tokio::test]
async fn test_restore_unknown_identifier() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("ls -1", LISTING);

    let err = hw.restore(&ctx, "nothing-here", false).await.unwrap_err();
    assert!(matches!(err, Error::BackupNotFound { .. }));
    assert_eq!(err.exit_code(), 6);
    assert!(!mock.ran("drush updb"));
}

#[tokio::test]
async fn test_backup_names_artifacts_with_hash() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("git rev-parse --short HEAD", "a1b2c3d\n");

    let output = hw.backup(&ctx, true).await.unwrap();

    let dump = output
        .files
        .iter()
        .find(|f| f.ends_with(".sql.gz"))
        .expect("database artifact");
    let archive = output
        .files
        .iter()
        .find(|f| f.ends_with(".tgz"))
        .expect("files artifact");
    assert!(dump.starts_with("/var/backups/site/live--a1b2c3d--"));
    assert_eq!(
        dump.trim_end_matches(".sql.gz"),
        archive.trim_end_matches(".tgz")
    );
    assert!(mock.ran("tar -czf /var/backups/site/live--a1b2c3d--"));
}

#[tokio::test]
async fn test_backup_db_skips_files() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");

    let output = hw.backup(&ctx, false).await.unwrap();
    assert_eq!(output.files.len(), 1);
    assert!(mock.ran("drush sql-dump"));
    assert!(!mock.ran("tar -czf"));
}

#[tokio::test]
async fn test_restore_same_commit_uses_latest_backup() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout(
        "ls -1",
        "live--abc1234--2024-01-10--10-00-00.sql.gz\n\
         live--abc1234--2024-01-10--10-00-00.tgz\n\
         live--abc1234--2024-01-15--09-00-00.sql.gz\n\
         live--abc1234--2024-01-15--09-00-00.tgz\n",
    );

    let found = hw.find_backups(&ctx, "live").await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|r| r.date == "2024-01-15"));

    hw.restore(&ctx, "abc1234", false).await.unwrap();
    assert!(mock.ran("zcat /var/backups/site/live--abc1234--2024-01-15--09-00-00.sql.gz"));
    assert!(mock.ran("tar -xzf /var/backups/site/live--abc1234--2024-01-15--09-00-00.tgz"));
    assert!(!mock.ran("zcat /var/backups/site/live--abc1234--2024-01-10"));
    assert!(!mock.ran("tar -xzf /var/backups/site/live--abc1234--2024-01-10"));
}
