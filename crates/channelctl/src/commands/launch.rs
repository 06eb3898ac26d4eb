use anyhow::{Result, bail};
use command_channel::{PipeTransport, Transport, TransportEvent, TransportStreams};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info};

use super::Context;

/// Launch `command` and bridge its streams to ours until the debuggee exits
pub fn run(context: &Context, target: Option<&str>, command: &str) -> Result<i32> {
    let mut transport: Box<dyn Transport> = match target {
        Some(target) => Box::new(PipeTransport::new(context.connect(target)?, command)),
        None => fifo_transport(context, command)?,
    };

    let (exit_tx, exit_rx) = mpsc::channel();
    transport.start(Arc::new(move |event| {
        let _ = exit_tx.send(event);
    }))?;

    let Some(TransportStreams { mut reader, mut writer }) = transport.take_streams() else {
        bail!("Transport did not provide streams");
    };
    info!(command, "debugger running");

    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut stdout = std::io::stdout();
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 || stdout.write_all(&buf[..n]).and_then(|()| stdout.flush()).is_err() {
                break;
            }
        }
    });
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut stdin = std::io::stdin();
        while let Ok(n) = stdin.read(&mut buf) {
            if n == 0 || writer.write_all(&buf[..n]).and_then(|()| writer.flush()).is_err() {
                break;
            }
        }
        debug!("input closed");
    });

    let code = match exit_rx.recv() {
        Ok(TransportEvent::DebuggeeExited { exit_code }) => exit_code.unwrap_or(0),
        Err(_) => 1,
    };
    transport.close();
    Ok(code)
}

#[cfg(unix)]
fn fifo_transport(context: &Context, command: &str) -> Result<Box<dyn Transport>> {
    let settings = context.settings();
    Ok(Box::new(
        command_channel::FifoTransport::new(command, settings.terminal())
            .with_handshake_timeout(settings.handshake_timeout()),
    ))
}

#[cfg(not(unix))]
fn fifo_transport(_context: &Context, _command: &str) -> Result<Box<dyn Transport>> {
    bail!("Terminal launch needs named pipes; use --target on this platform")
}
