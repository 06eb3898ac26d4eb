//! Tests for composite connection operations against the local machine

use command_channel::connection::STAGING_PREFIX;
use command_channel::{ContainerConfig, Connection, Error};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn staging_entries() -> HashSet<String> {
    fs::read_dir("/tmp")
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with(STAGING_PREFIX))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_make_directory_creates_and_resolves() {
    let scratch = tempfile::tempdir().unwrap();
    let target = scratch.path().join("a/b/c");
    let connection = Connection::local();

    let resolved = connection.make_directory(&target.to_string_lossy()).unwrap();
    assert!(target.is_dir());
    assert_eq!(Path::new(&resolved), target.as_path());

    // Idempotent.
    let again = connection.make_directory(&target.to_string_lossy()).unwrap();
    assert_eq!(again, resolved);
}

#[test]
fn test_make_directory_with_spaces() {
    let scratch = tempfile::tempdir().unwrap();
    let target = scratch.path().join("with space");
    let resolved = Connection::local()
        .make_directory(&target.to_string_lossy())
        .unwrap();
    assert_eq!(Path::new(&resolved), target.as_path());
}

#[test]
fn test_make_directory_blank_is_noop() {
    let connection = Connection::local();
    assert_eq!(connection.make_directory("").unwrap(), "");
    assert_eq!(connection.live_runner_count(), 0);
}

#[test]
fn test_make_directory_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let blocker = scratch.path().join("file");
    fs::write(&blocker, "x").unwrap();

    let err = Connection::local()
        .make_directory(&blocker.join("sub").to_string_lossy())
        .unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }));
}

#[test]
fn test_copy_file_locally() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("source.txt");
    fs::write(&source, "payload").unwrap();
    let destination = scratch.path().join("dest.txt");

    Connection::local()
        .copy_file(&source, &destination.to_string_lossy())
        .unwrap();
    assert_eq!(fs::read_to_string(&destination).unwrap(), "payload");
}

#[test]
fn test_copy_directory_locally() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("tree");
    fs::create_dir_all(source.join("nested")).unwrap();
    fs::write(source.join("nested/file"), "deep").unwrap();
    let destination = scratch.path().join("copy");

    Connection::local()
        .copy_file_with_timeout(&source, &destination.to_string_lossy(), Some(Duration::from_secs(10)))
        .unwrap();
    assert_eq!(fs::read_to_string(destination.join("nested/file")).unwrap(), "deep");
}

#[test]
fn test_copy_failure_is_command_failed() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("source.txt");
    fs::write(&source, "payload").unwrap();

    let err = Connection::local()
        .copy_file(&source, "/nonexistent-dir-for-tests/dest.txt")
        .unwrap_err();
    assert!(matches!(err, Error::CommandFailed { exit_code, .. } if exit_code != 0));
}

#[test]
fn test_copy_missing_source_is_argument_error() {
    let err = Connection::local()
        .copy_file(Path::new("/nonexistent-source-for-tests"), "/tmp/never")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn test_nested_copy_leaves_no_staging_file() {
    let scratch = tempfile::tempdir().unwrap();
    let source = scratch.path().join("tool");
    fs::write(&source, "binary").unwrap();
    let before = staging_entries();

    // The container does not exist, so the inner copy fails whether or not docker is
    // installed; the staged file must still be removed from the outer target.
    let outer = Connection::local();
    let container = Connection::container(
        ContainerConfig::new("command-channel-test-no-such-container"),
        Some(outer.clone()),
    );
    let err = container.copy_file(&source, "/opt/tool").unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }));

    let leaked: Vec<_> = staging_entries().difference(&before).cloned().collect();
    assert!(leaked.is_empty(), "staging files left behind: {leaked:?}");
}

#[test]
fn test_list_processes_includes_self() {
    if !Path::new("/bin/ps").exists() && !Path::new("/usr/bin/ps").exists() {
        return;
    }
    let processes = Connection::local().list_processes().unwrap();
    let me = std::process::id();
    assert!(processes.iter().any(|process| process.pid == me));
}

#[test]
fn test_close_disposes_all_runners() {
    let connection = Connection::local();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            connection
                .begin_execute_async_command("sleep 30", true, std::sync::Arc::new(|_| {}))
                .unwrap()
        })
        .collect();
    assert_eq!(connection.live_runner_count(), 3);

    connection.close();
    connection.close();
    assert!(handles.iter().all(|handle| !handle.is_running()));
    assert_eq!(connection.live_runner_count(), 0);
    assert!(matches!(
        connection.execute_command("true", Duration::from_secs(1)),
        Err(Error::Disposed { .. })
    ));
}

#[test]
fn test_finished_runners_leave_the_live_set() {
    let connection = Connection::local();
    let (tx, rx) = std::sync::mpsc::channel();
    let _handle = connection
        .begin_execute_async_command(
            "true",
            false,
            std::sync::Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        )
        .unwrap();
    while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
        if matches!(event, command_channel::RunnerEvent::Closed { .. }) {
            break;
        }
    }
    // Removal happens right after the subscriber returns.
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(connection.live_runner_count(), 0);
}
