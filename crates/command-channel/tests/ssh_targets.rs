//! SSH targets against a reachable host
//!
//! Run with `--features ssh-tests` and `CHANNEL_TEST_SSH_HOST` (optionally
//! `CHANNEL_TEST_SSH_USER`, `CHANNEL_TEST_SSH_PORT`) pointing at a host that accepts
//! non-interactive logins.

#![cfg(feature = "ssh-tests")]

use command_channel::{Connection, SshConfig};
use std::time::Duration;

fn ssh_config() -> Option<SshConfig> {
    let host = std::env::var("CHANNEL_TEST_SSH_HOST").ok()?;
    let mut config = SshConfig::new(host)
        .with_extra_arg("-o")
        .with_extra_arg("BatchMode=yes")
        .with_extra_arg("-o")
        .with_extra_arg("StrictHostKeyChecking=no");
    if let Ok(user) = std::env::var("CHANNEL_TEST_SSH_USER") {
        config = config.with_user(user);
    }
    if let Some(port) = std::env::var("CHANNEL_TEST_SSH_PORT").ok().and_then(|p| p.parse().ok()) {
        config = config.with_port(port);
    }
    Some(config)
}

#[test]
fn test_execute_over_ssh() {
    let Some(config) = ssh_config() else {
        eprintln!("CHANNEL_TEST_SSH_HOST not set, skipping");
        return;
    };
    let connection = Connection::ssh(config);
    let result = connection
        .execute_command("echo $((40 + 2))", Duration::from_secs(30))
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "42");
}

#[test]
fn test_copy_and_mkdir_over_ssh() {
    let Some(config) = ssh_config() else {
        eprintln!("CHANNEL_TEST_SSH_HOST not set, skipping");
        return;
    };
    let connection = Connection::ssh(config);
    let remote_dir = connection.make_directory("/tmp/command-channel-ssh-test").unwrap();
    assert_eq!(remote_dir, "/tmp/command-channel-ssh-test");

    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("file.txt");
    std::fs::write(&source, "over scp").unwrap();
    connection
        .copy_file(&source, "/tmp/command-channel-ssh-test/file.txt")
        .unwrap();

    let content = connection
        .execute_command_checked("cat /tmp/command-channel-ssh-test/file.txt", Duration::from_secs(30))
        .unwrap();
    assert_eq!(content, "over scp");
    let _ = connection.execute_command("rm -rf /tmp/command-channel-ssh-test", Duration::from_secs(30));
}
