//! Interfaces to the collaborators that sit above the channel
//!
//! Picking a target, showing progress and presenting fatal errors belong to the caller.
//! These traits are the seams through which the channel reaches them.

use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Turns a human-readable target name into a ready connection
pub trait TargetResolver: Send + Sync {
    /// Resolve `name`. `Ok(None)` means the user cancelled.
    fn resolve(&self, name: &str) -> Result<Option<Connection>>;
}

/// Wraps long-running synchronous calls, e.g. with a progress indicator
pub trait WaitReporter: Send + Sync {
    /// Called before a long-running call starts
    fn begin_wait(&self, message: &str);

    /// Called once the call has returned, successfully or not
    fn end_wait(&self, message: &str);
}

/// Run `f` bracketed by `reporter`'s wait notifications
pub fn run_with_wait<T, F>(reporter: &dyn WaitReporter, message: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    reporter.begin_wait(message);
    let result = f();
    reporter.end_wait(message);
    result
}

/// Wait reporter that only traces
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpWaitReporter;

impl WaitReporter for NoOpWaitReporter {
    fn begin_wait(&self, message: &str) {
        debug!(message, "waiting");
    }

    fn end_wait(&self, message: &str) {
        debug!(message, "wait finished");
    }
}

/// Presents fatal setup failures to the user
pub trait ErrorReporter: Send + Sync {
    /// Report a failure that aborts the current operation
    fn report_fatal(&self, title: &str, error: &Error);
}

/// Error reporter that logs at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report_fatal(&self, title: &str, error: &Error) {
        error!(title, error = %error, "fatal error");
    }
}

/// Resolve `name` or report why it could not be resolved
pub fn resolve_or_report(
    resolver: &dyn TargetResolver,
    reporter: &dyn ErrorReporter,
    name: &str,
) -> Option<Connection> {
    match resolver.resolve(name) {
        Ok(connection) => connection,
        Err(e) => {
            reporter.report_fatal(&format!("Unable to connect to {name}"), &e);
            None
        }
    }
}
