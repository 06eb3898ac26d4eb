//! Tests for blocking execution through a local connection

use command_channel::{Connection, Error, TIMEOUT_EXIT_CODE};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_echo_hello() {
    let connection = Connection::local();
    let result = connection
        .execute_command("echo hello", Duration::from_millis(5000))
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "hello");
}

#[test]
fn test_trailing_newlines_trimmed_interior_kept() {
    let connection = Connection::local();
    let result = connection
        .execute_command("printf 'a\\n\\nb\\r\\n\\n\\n'", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.output, "a\n\nb");
}

#[test]
fn test_non_zero_exit_is_returned() {
    let connection = Connection::local();
    let result = connection
        .execute_command("echo partial; exit 3", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.output, "partial");
}

#[test]
fn test_stderr_is_not_accumulated() {
    let connection = Connection::local();
    let result = connection
        .execute_command("echo out; echo err >&2", Duration::from_secs(5))
        .unwrap();
    assert_eq!(result.output, "out");
}

#[test]
fn test_timeout_returns_sentinel_promptly() {
    let connection = Connection::local();
    let begin = Instant::now();
    let result = connection
        .execute_command("sleep 10", Duration::from_millis(100))
        .unwrap();
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.timed_out());
    assert!(begin.elapsed() < Duration::from_secs(3));

    // The slot is free again.
    let result = connection.execute_command("true", Duration::from_secs(5)).unwrap();
    assert!(result.success());
}

#[test]
fn test_checked_variants() {
    let connection = Connection::local();
    assert_eq!(
        connection
            .execute_command_checked("echo ok", Duration::from_secs(5))
            .unwrap(),
        "ok"
    );

    let err = connection
        .execute_command_checked("echo broken; exit 2", Duration::from_secs(5))
        .unwrap_err();
    match err {
        Error::CommandFailed {
            command,
            exit_code,
            output,
        } => {
            assert_eq!(command, "echo broken; exit 2");
            assert_eq!(exit_code, 2);
            assert_eq!(output, "broken");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = connection
        .execute_command_checked("sleep 5", Duration::from_millis(50))
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_concurrent_call_fails_fast() {
    let connection = Connection::local();
    let background = {
        let connection = connection.clone();
        std::thread::spawn(move || connection.execute_command("sleep 1; echo done", Duration::from_secs(5)))
    };

    std::thread::sleep(Duration::from_millis(200));
    let begin = Instant::now();
    let err = connection
        .execute_command("echo second", Duration::from_secs(5))
        .unwrap_err();
    assert!(matches!(err, Error::CommandInProgress { ref command } if command == "sleep 1; echo done"));
    assert!(begin.elapsed() < Duration::from_millis(100));

    let first = background.join().unwrap().unwrap();
    assert_eq!(first.output, "done");
}

#[test]
fn test_close_aborts_outstanding_call() {
    let connection = Connection::local();
    let background = {
        let connection = connection.clone();
        std::thread::spawn(move || connection.execute_command("sleep 10", Duration::from_secs(30)))
    };
    std::thread::sleep(Duration::from_millis(200));

    let begin = Instant::now();
    connection.close();
    let result = background.join().unwrap();
    assert!(matches!(result, Err(Error::Disposed { .. })));
    assert!(begin.elapsed() < Duration::from_secs(3));
    assert_eq!(connection.live_runner_count(), 0);
}

#[test]
fn test_async_command_events() {
    let connection = Connection::local();
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = connection
        .begin_execute_async_command(
            "cat",
            false,
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
        )
        .unwrap();
    assert!(handle.is_running());
    assert_eq!(connection.live_runner_count(), 1);

    handle.write_line("ping");
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        command_channel::RunnerEvent::Output("ping".into())
    );

    connection.close();
    assert!(!handle.is_running());
    assert_eq!(connection.live_runner_count(), 0);
}
