//! Stdin handling for local processes
//!
//! Writes happen on the caller's thread and only block as long as the OS pipe buffer
//! is full.

use futures_lite::io::AsyncWriteExt;

use crate::error::Result;

/// Handle for writing to a process's stdin
pub(crate) struct StdinHandle {
    /// The actual stdin writer
    stdin: Option<async_process::ChildStdin>,
}

impl StdinHandle {
    /// Create a new stdin handle
    pub(crate) fn new(stdin: Option<async_process::ChildStdin>) -> Self {
        Self { stdin }
    }

    /// Write raw text to stdin and flush it
    pub(crate) fn write(&mut self, text: &str) -> Result<()> {
        if let Some(stdin) = &mut self.stdin {
            futures_lite::future::block_on(async {
                stdin.write_all(text.as_bytes()).await?;
                stdin.flush().await
            })?;
        }
        Ok(())
    }

    /// Close stdin by dropping the writer
    pub(crate) fn close(&mut self) {
        self.stdin.take();
    }
}
