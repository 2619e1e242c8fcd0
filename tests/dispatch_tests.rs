//! Capability dispatch and high-level task tests against a recording mock.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serial_test::serial;

use hostwright::connection::ssh::SSH_PROGRAM_ENV;
use hostwright::error::Error;
use hostwright::methods::TaskContext;

use common::*;

fn before(mock: &MockConnection, first: &str, second: &str) {
    let a = mock
        .position(first)
        .unwrap_or_else(|| panic!("'{}' never ran: {:?}", first, mock.commands()));
    let b = mock
        .position(second)
        .unwrap_or_else(|| panic!("'{}' never ran: {:?}", second, mock.commands()));
    assert!(a < b, "'{}' should run before '{}': {:?}", first, second, mock.commands());
}

#[tokio::test]
async fn test_deploy_then_reset_on_dev() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");

    let output = hw.deploy(&ctx, None).await.unwrap();
    assert!(output.changed);

    before(&mock, "git fetch -q origin", "git checkout main");
    before(&mock, "git checkout main", "git pull -q origin main");
    before(&mock, "git pull -q origin main", "composer install");
    before(&mock, "composer install", "drush updb -y");
    before(&mock, "drush updb -y", "echo reset done");
    before(&mock, "echo reset done", "drush cr");

    // dev hosts skip the pre-deploy dump
    assert!(!mock.ran("sql-dump"));

    let recorded = mock.recorded();
    let checkout = recorded
        .iter()
        .find(|r| r.command == "git checkout main")
        .unwrap();
    assert_eq!(checkout.cwd.as_deref(), Some("/var/www/site"));
    let updb = recorded.iter().find(|r| r.command == "drush updb -y").unwrap();
    assert_eq!(updb.cwd.as_deref(), Some("/var/www/site/web/sites/default"));
}

#[tokio::test]
async fn test_deploy_on_prod_dumps_first() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");

    hw.deploy(&ctx, Some("release-2")).await.unwrap();

    before(&mock, "drush sql-dump", "git fetch -q origin");
    assert!(mock.ran("git checkout release-2"));
    assert!(mock.ran("drush config-import staging -y"));
    assert!(mock.ran("drush cset system.site uuid 5c1d2f6e-0000-4000-8000-000000000000 -y"));
    // composer is not needed by this host
    assert!(!mock.ran("composer"));
}

#[tokio::test]
async fn test_failed_pull_stops_before_reset() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");
    mock.fail_on("git pull", 1, "merge conflict");

    let err = hw.deploy(&ctx, None).await.unwrap_err();
    match &err {
        Error::CommandFailed {
            command, exit_code, stderr, ..
        } => {
            assert_eq!(command, "git pull -q origin main");
            assert_eq!(*exit_code, 1);
            assert_eq!(stderr, "merge conflict");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!mock.ran("drush updb"));
}

#[tokio::test]
async fn test_install_guards() {
    let hw = hostwright();

    let (live, live_mock) = mock_context(&hw, "live");
    let err = hw.install(&live).await.unwrap_err();
    assert!(matches!(err, Error::TaskNotAllowed { ref task, .. } if task == "install"));
    assert!(live_mock.commands().is_empty());

    let (staging, _) = mock_context(&hw, "staging");
    assert!(matches!(
        hw.install(&staging).await,
        Err(Error::TaskNotAllowed { .. })
    ));

    let (dev, mock) = mock_context(&hw, "dev");
    hw.install(&dev).await.unwrap();
    before(&mock, "drush site-install standard", "drush updb -y");
}

#[tokio::test]
async fn test_update_app_requires_dev() {
    let hw = hostwright();

    let (live, _) = mock_context(&hw, "live");
    assert!(matches!(
        hw.update_app(&live).await,
        Err(Error::TaskNotAllowed { ref task, .. }) if task == "updateApp"
    ));

    let (dev, mock) = mock_context(&hw, "dev");
    hw.update_app(&dev).await.unwrap();
    before(&mock, "drush sql-dump", "composer update");
}

#[tokio::test]
async fn test_drush_pass_through() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("drush status", "Drupal version : 8.9.20\n");

    let output = hw.drush(&ctx, "status").await.unwrap();
    assert_eq!(mock.commands(), vec!["drush status"]);
    assert!(output.messages.iter().any(|m| m.contains("8.9.20")));
}

#[tokio::test]
async fn test_composer_requires_capability_keys() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");

    hw.composer(&ctx, "install --no-dev").await.unwrap();
    let recorded = mock.recorded();
    assert_eq!(recorded[0].command, "composer install --no-dev");
    assert_eq!(recorded[0].cwd.as_deref(), Some("/var/www/site"));
}

#[tokio::test]
async fn test_version() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    mock.respond_stdout("git describe", "v1.4.2-3-gabc1234\n");

    assert_eq!(hw.version(&ctx).await.unwrap(), "v1.4.2-3-gabc1234");
}

#[tokio::test]
async fn test_script_with_arguments() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");

    let mut named = IndexMap::new();
    named.insert("name".to_string(), "world".to_string());
    hw.script(&ctx, "greet", Vec::new(), named).await.unwrap();
    assert_eq!(mock.commands(), vec!["echo hello world"]);

    let err = hw
        .script(&ctx, "missing", Vec::new(), IndexMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ScriptNotFound(ref name) if name == "missing"));
}

#[tokio::test]
async fn test_copy_from_self_is_refused() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");

    assert!(matches!(
        hw.copy_db_from(&ctx, "dev").await,
        Err(Error::TaskNotAllowed { .. })
    ));
    assert!(mock.commands().is_empty());
}

#[tokio::test]
async fn test_copy_files_from() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");

    hw.copy_files_from(&ctx, "live").await.unwrap();
    let command = mock
        .commands()
        .into_iter()
        .find(|c| c.starts_with("rsync"))
        .unwrap();
    assert!(command.contains("deploy@example.com:/var/www/site/web/sites/default/files/"));
    assert!(command.ends_with(" /var/www/site/web/sites/default/files"));
}

#[tokio::test]
async fn test_get_file_downloads() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    let dir = tempfile::tempdir().unwrap();

    hw.get_file(&ctx, "/var/log/app.log", dir.path().to_str().unwrap())
        .await
        .unwrap();
    let downloads = mock.downloads();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].0.to_str(), Some("/var/log/app.log"));
    assert_eq!(downloads[0].1, dir.path().join("app.log"));
}

#[tokio::test]
async fn test_failing_reset_script_does_not_abort_reset() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "dev");
    mock.fail_on("echo reset done", 1, "boom");

    hw.reset(&ctx, false).await.unwrap();
    before(&mock, "echo reset done", "drush cr");
}

#[tokio::test]
async fn test_put_file_uploads_into_tmp_folder() {
    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("dump.sql");
    std::fs::write(&local, "-- dump").unwrap();

    let output = hw.put_file(&ctx, local.to_str().unwrap()).await.unwrap();
    assert_eq!(output.files, vec!["/tmp/dump.sql"]);
    assert_eq!(mock.uploads(), vec![(local.clone(), PathBuf::from("/tmp/dump.sql"))]);

    let config = ctx.config.with_value("runLocally", true);
    let local_ctx = ctx.for_host(Arc::new(config), ctx.shell.clone());
    assert!(matches!(
        hw.put_file(&local_ctx, local.to_str().unwrap()).await,
        Err(Error::TaskNotAllowed { ref task, .. }) if task == "putFile"
    ));
    assert_eq!(mock.uploads().len(), 1);
}

/// Write an executable stand-in for the ssh client.
fn fake_ssh(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join("ssh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// The same host, reachable only through a bastion.
fn behind_bastion(ctx: &TaskContext, local_port: u16) -> TaskContext {
    let tunnel: serde_yaml::Value = serde_yaml::from_str(&format!(
        "{{bridgeUser: jump, bridgeHost: bastion.example.com, destHost: 10.0.0.5, localPort: {}}}",
        local_port
    ))
    .unwrap();
    let config = ctx.config.with_value("sshTunnel", tunnel);
    ctx.for_host(Arc::new(config), ctx.shell.clone())
}

#[tokio::test]
#[serial]
async fn test_pass_through_waits_for_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let ssh = fake_ssh(
        &dir,
        "echo 'jump@bastion.example.com: Permission denied (publickey).' >&2\nexit 255",
    );
    std::env::set_var(SSH_PROGRAM_ENV, &ssh);

    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    let ctx = behind_bastion(&ctx, 2031);

    let drush = hw.drush(&ctx, "status").await;
    let version = hw.version(&ctx).await;
    std::env::remove_var(SSH_PROGRAM_ENV);

    assert!(matches!(drush, Err(Error::TunnelExited { .. })));
    assert!(matches!(version, Err(Error::TunnelExited { .. })));
    assert!(mock.commands().is_empty());
    assert!(hw.tunnels().is_empty());
}

#[tokio::test]
#[serial]
async fn test_pass_through_runs_via_tunnel() {
    let dir = tempfile::tempdir().unwrap();
    let ssh = fake_ssh(
        &dir,
        "case \"$*\" in\n\
         *-vAN*) echo 'debug1: Entering interactive session.' >&2; exec sleep 30 ;;\n\
         *) echo \"via $*\" ;;\n\
         esac",
    );
    std::env::set_var(SSH_PROGRAM_ENV, &ssh);

    let hw = hostwright();
    let (ctx, mock) = mock_context(&hw, "live");
    let ctx = behind_bastion(&ctx, 2032);

    let drush = hw.drush(&ctx, "status").await;
    let version = hw.version(&ctx).await;
    let open = hw.tunnels().len();
    hw.shutdown().await;
    std::env::remove_var(SSH_PROGRAM_ENV);

    let drush = drush.unwrap();
    assert!(drush
        .messages
        .iter()
        .any(|m| m.contains("deploy@localhost") && m.contains("drush status")));
    assert!(version.unwrap().contains("-p 2032 deploy@localhost"));
    assert_eq!(open, 1);
    assert!(mock.commands().is_empty());
    assert!(hw.tunnels().is_empty());
}
