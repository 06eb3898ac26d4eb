//! Debugger reached through a connection's interactive command
//!
//! The debugger runs as an ordinary command on the connection's target with its
//! standard streams piped back. Output arrives as runner events and is turned back into
//! a byte stream; input is forwarded to the command as-is. Because the connection is
//! still available, one-off commands can run next to the debugger.

use async_channel::Receiver;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connection::{AsyncCommandHandle, Connection};
use crate::error::{Error, Result};
use crate::event::{ErrorSource, EventCallback, RunnerEvent};
use crate::sync_exec::ExecOutput;
use crate::transport::{Transport, TransportCallback, TransportEvent, TransportStreams};

/// Transport running the debugger through [`Connection::begin_execute_async_command`]
pub struct PipeTransport {
    connection: Connection,
    debugger_command: String,
    command: Option<AsyncCommandHandle>,
    streams: Option<TransportStreams>,
}

impl PipeTransport {
    /// Prepare a transport that runs `debugger_command` in a shell on `connection`
    pub fn new(connection: Connection, debugger_command: impl Into<String>) -> Self {
        Self {
            connection,
            debugger_command: debugger_command.into(),
            command: None,
            streams: None,
        }
    }

    /// The connection the debugger runs on
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Transport for PipeTransport {
    fn start(&mut self, callback: TransportCallback) -> Result<()> {
        if self.command.is_some() {
            return Err(Error::invalid_state("pipe transport is already started"));
        }

        let (tx, rx) = async_channel::unbounded::<Vec<u8>>();
        let events: EventCallback = Arc::new(move |event| match event {
            RunnerEvent::Output(line) => {
                let mut bytes = line.into_bytes();
                bytes.push(b'\n');
                let _ = tx.send_blocking(bytes);
            }
            RunnerEvent::Chunk(bytes) => {
                let _ = tx.send_blocking(bytes);
            }
            RunnerEvent::Error {
                source: ErrorSource::Stderr,
                detail,
            } => debug!(detail, "debugger stderr"),
            RunnerEvent::Error {
                source: ErrorSource::Fault,
                detail,
            } => {
                warn!(detail, "debugger stream failed");
                tx.close();
            }
            RunnerEvent::Closed { exit_code } => {
                tx.close();
                callback(TransportEvent::DebuggeeExited {
                    exit_code: Some(exit_code),
                });
            }
        });

        let command = self
            .connection
            .begin_execute_async_command(&self.debugger_command, true, events)?;
        debug!(connection = %self.connection.describe(), command = %self.debugger_command, "started piped debugger");

        self.streams = Some(TransportStreams {
            reader: Box::new(ChannelReader::new(rx)),
            writer: Box::new(CommandWriter::new(command.clone())),
        });
        self.command = Some(command);
        Ok(())
    }

    fn take_streams(&mut self) -> Option<TransportStreams> {
        self.streams.take()
    }

    fn execute_sync_command(&self, command_text: &str, timeout: Duration) -> Result<ExecOutput> {
        self.connection.execute_command(command_text, timeout)
    }

    fn can_execute_command(&self) -> bool {
        !self.connection.is_closed()
    }

    fn close(&mut self) {
        self.streams = None;
        if let Some(command) = self.command.take() {
            command.close();
        }
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Blocking reader over the chunks of a channel; end of stream once it is closed
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            match self.rx.recv_blocking() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(n)
    }
}

/// Writer forwarding to the debugger command's input.
///
/// A UTF-8 sequence split across writes is held back until its remaining bytes arrive.
struct CommandWriter {
    command: AsyncCommandHandle,
    pending: Vec<u8>,
}

impl CommandWriter {
    fn new(command: AsyncCommandHandle) -> Self {
        Self {
            command,
            pending: Vec::new(),
        }
    }
}

impl Write for CommandWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.command.is_running() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "debugger is not running"));
        }
        self.pending.extend_from_slice(buf);

        let complete = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                self.pending.clear();
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        };
        if complete > 0 {
            let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
            self.command.write(&text);
            self.pending.drain(..complete);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_channel::Sender;

    fn reader_pair() -> (Sender<Vec<u8>>, ChannelReader) {
        let (tx, rx) = async_channel::unbounded();
        (tx, ChannelReader::new(rx))
    }

    #[test]
    fn test_channel_reader_spans_chunks() {
        let (tx, mut reader) = reader_pair();
        tx.send_blocking(b"hel".to_vec()).unwrap();
        tx.send_blocking(b"lo\n".to_vec()).unwrap();
        tx.close();

        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello\n");
    }

    #[test]
    fn test_channel_reader_small_buffer() {
        let (tx, mut reader) = reader_pair();
        tx.send_blocking(b"abcdef".to_vec()).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn test_cat_round_trip() {
        let mut transport = PipeTransport::new(Connection::local(), "cat");
        let (tx, rx) = std::sync::mpsc::channel();
        transport
            .start(Arc::new(move |event| {
                let _ = tx.send(event);
            }))
            .unwrap();
        assert!(transport.can_execute_command());

        let TransportStreams { mut reader, mut writer } = transport.take_streams().unwrap();
        assert!(transport.take_streams().is_none());
        writer.write_all(b"-gdb-version\n").unwrap();

        let mut line = [0u8; 13];
        reader.read_exact(&mut line).unwrap();
        assert_eq!(&line, b"-gdb-version\n");

        drop(writer);
        transport.close();
        drop(reader);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_split_utf8_sequence_is_reassembled() {
        let mut transport = PipeTransport::new(Connection::local(), "cat");
        transport.start(Arc::new(|_: TransportEvent| {})).unwrap();
        let TransportStreams { mut reader, mut writer } = transport.take_streams().unwrap();

        let bytes = "é\n".as_bytes();
        assert_eq!(writer.write(&bytes[..1]).unwrap(), 1);
        assert_eq!(writer.write(&bytes[1..]).unwrap(), bytes.len() - 1);

        let mut echoed = [0u8; 3];
        reader.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed[..], bytes);

        assert!(writer.write(&[0xff, b'\n']).is_err());
        transport.close();
    }
}
