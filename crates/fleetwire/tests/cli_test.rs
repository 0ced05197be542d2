#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

/// 指定ディレクトリの設定ファイルだけを見るコマンド
fn fleetwire(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fleetwire").unwrap();
    cmd.current_dir(dir)
        .env("FLEETWIRE_CONFIG", dir.join("fleetwire.yaml"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("FLEETWIRE_TAG");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("fleetwire").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("一度のデプロイで"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("outputs"))
        .stdout(predicate::str::contains("version"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("fleetwire").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "fleetwire {}",
            env!("CARGO_PKG_VERSION")
        )));
}

/// deployコマンドのヘルプに全フラグが表示されることを確認
#[test]
fn test_deploy_help() {
    let mut cmd = Command::cargo_bin("fleetwire").unwrap();
    let output = cmd.arg("deploy").arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--skip-infra",
        "--skip-images",
        "--skip-cluster",
        "--skip-hosts",
        "--skip-frontend",
        "--skip-notification-service",
        "--tag",
        "--rollout-timeout",
        "--warmup-timeout",
        "--parallelism",
        "--dry-run",
    ] {
        assert!(stdout.contains(flag), "missing {}", flag);
    }
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("fleetwire").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// ドライランは外部ツールに触れず計画だけを表示
#[test]
fn test_deploy_dry_run_prints_plan() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fleetwire.yaml"), "namespace: demo-ns\n").unwrap();

    fleetwire(dir.path())
        .args(["deploy", "--dry-run", "--skip-infra", "--tag", "v7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("実行計画"))
        .stdout(predicate::str::contains("v7"))
        .stdout(predicate::str::contains("infra (スキップ)"))
        .stdout(predicate::str::contains("cluster/demo-ns"))
        .stdout(predicate::str::contains("host/gateway"))
        .stdout(predicate::str::contains("webapp/frontend"));
}

/// --skip-notification-service は計画からも除外される
#[test]
fn test_dry_run_without_notification_service() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fleetwire.yaml"), "").unwrap();

    fleetwire(dir.path())
        .args(["deploy", "--dry-run", "--skip-notification-service"])
        .assert()
        .success()
        .stdout(predicate::str::contains("order-service"))
        .stdout(predicate::str::contains("notification-service").not());
}

/// 設定ファイルの解析エラーはパス付きで失敗する
#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fleetwire.yaml"), "host_parallelism: [1, 2\n").unwrap();

    fleetwire(dir.path())
        .args(["deploy", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fleetwire.yaml"));
}

/// 並列数0は拒否される
#[test]
fn test_zero_parallelism_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fleetwire.yaml"), "").unwrap();

    fleetwire(dir.path())
        .args(["deploy", "--dry-run", "--parallelism", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--parallelism"));
}
