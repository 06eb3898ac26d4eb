//! Liveness polling for processes that are not our children

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// How often a monitored PID is probed
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Returns true while `pid` names a process, including one we may not signal
pub fn is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Polls a PID on a background thread and fires a callback once when it disappears
pub(crate) struct PidMonitor {
    stop: Arc<AtomicBool>,
}

impl PidMonitor {
    /// Start watching `pid`
    pub(crate) fn spawn<F>(pid: u32, interval: Duration, on_exit: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("pid-monitor-{pid}"))
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if !is_alive(pid) {
                        // Stopping wins over a late exit notification.
                        if !flag.swap(true, Ordering::SeqCst) {
                            debug!(pid, "monitored process exited");
                            on_exit();
                        }
                        return;
                    }
                    thread::sleep(interval);
                }
            })?;
        Ok(Self { stop })
    }

    /// Stop watching; the callback will not fire after this returns
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for PidMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_own_pid_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn test_fires_once_on_exit() {
        let mut child = std::process::Command::new("sleep").arg("0.2").spawn().unwrap();
        let pid = child.id();

        let (tx, rx) = std::sync::mpsc::channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _monitor = PidMonitor::spawn(pid, Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        })
        .unwrap();

        // Reap the child so it does not linger as a zombie.
        child.wait().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_suppresses_callback() {
        let mut child = std::process::Command::new("sleep").arg("0.3").spawn().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let monitor = PidMonitor::spawn(child.id(), Duration::from_millis(20), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        monitor.stop();
        child.wait().unwrap();
        thread::sleep(Duration::from_millis(150));
        assert!(!fired.load(Ordering::SeqCst));
    }
}
