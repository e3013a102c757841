use assert_cmd::Command;
use predicates::prelude::*;

fn verse_cli() -> Command {
    let mut cmd = Command::cargo_bin("verse_cli").unwrap();
    // Keep the caller's environment out of argument defaults.
    for key in [
        "DATABASE_URL",
        "OWNER_TABLES",
        "IDENTITY_PROVIDER_URL",
        "IDENTITY_PROVIDER_SERVICE_KEY",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn version_prints_name_and_version() {
    verse_cli()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "verse_cli {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn help_lists_commands() {
    verse_cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("status")
                .and(predicate::str::contains("reconcile"))
                .and(predicate::str::contains("receipts")),
        );
}

#[test]
fn invalid_owner_table_fails_before_connecting() {
    verse_cli()
        .args(["status", "--owner-tables", "articles;drop table users"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid owner table name"));
}

#[test]
fn unknown_command_is_rejected() {
    verse_cli().arg("migrate-everything").assert().failure();
}
