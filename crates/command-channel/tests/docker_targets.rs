//! Container targets against a real docker daemon
//!
//! Run with `--features docker-tests`. A throwaway `alpine` container is started for
//! each test and removed afterwards.

#![cfg(feature = "docker-tests")]

use command_channel::connection::STAGING_PREFIX;
use command_channel::{ContainerConfig, Connection};
use std::process::Command as StdCommand;
use std::time::Duration;

struct Container {
    name: String,
}

impl Container {
    fn start(name: &str) -> Self {
        let status = StdCommand::new("docker")
            .args(["run", "-d", "--rm", "--name", name, "alpine:3", "sleep", "300"])
            .status()
            .unwrap();
        assert!(status.success(), "could not start test container");
        Self { name: name.to_string() }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        let _ = StdCommand::new("docker").args(["rm", "-f", &self.name]).status();
    }
}

#[test]
fn test_execute_in_container() {
    let container = Container::start("command-channel-exec");
    let connection = Connection::container(ContainerConfig::new(&container.name), None);
    let result = connection
        .execute_command("echo inside; cat /etc/alpine-release >/dev/null", Duration::from_secs(30))
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "inside");
}

#[test]
fn test_make_directory_in_container() {
    let container = Container::start("command-channel-mkdir");
    let connection = Connection::container(
        ContainerConfig::new(&container.name).with_working_dir("/tmp"),
        None,
    );
    // Each command runs in a fresh `docker exec`, so relative paths resolve against -w.
    assert_eq!(connection.make_directory("work/dir").unwrap(), "/tmp/work/dir");
}

#[test]
fn test_nested_copy_into_container() {
    let container = Container::start("command-channel-copy");
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("payload");
    std::fs::write(&source, "copied through staging").unwrap();

    let outer = Connection::local();
    let connection = Connection::container(ContainerConfig::new(&container.name), Some(outer.clone()));
    connection.copy_file(&source, "/tmp/payload").unwrap();

    let result = connection
        .execute_command_checked("cat /tmp/payload", Duration::from_secs(30))
        .unwrap();
    assert_eq!(result, "copied through staging");

    let leftovers = outer
        .execute_command(&format!("ls -d /tmp/{STAGING_PREFIX}* 2>/dev/null"), Duration::from_secs(10))
        .unwrap();
    assert!(leftovers.output.is_empty());
}
