//! Common test utilities

use command_channel::{EventCallback, RunnerEvent};
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;

/// Collects runner events into a channel
pub fn collector() -> (EventCallback, Receiver<RunnerEvent>) {
    let (tx, rx) = channel();
    let callback: EventCallback = std::sync::Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (callback, rx)
}

/// Receive events until `Closed`, returning everything seen including it
pub fn until_closed(rx: &Receiver<RunnerEvent>, timeout: Duration) -> Vec<RunnerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.recv_timeout(timeout) {
        let closed = matches!(event, RunnerEvent::Closed { .. });
        events.push(event);
        if closed {
            break;
        }
    }
    events
}

/// Output lines among `events`
pub fn output_lines(events: &[RunnerEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            RunnerEvent::Output(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

/// Exit code of the `Closed` event among `events`
pub fn exit_code(events: &[RunnerEvent]) -> Option<i32> {
    events.iter().find_map(|event| match event {
        RunnerEvent::Closed { exit_code } => Some(*exit_code),
        _ => None,
    })
}
