//! Cancellation for blocking driver calls.
//!
//! An [`AbortHandle`] and its [`AbortSignal`]s share a channel that never
//! carries messages. Dropping the handle disconnects the channel, which every
//! signal observes immediately, including threads parked in `select!`.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Owner side. Aborts when dropped or when [`abort`](Self::abort) is called.
#[derive(Debug)]
pub struct AbortHandle {
    _tx: Sender<()>,
}

impl AbortHandle {
    pub fn abort(self) {}
}

/// Observer side, cloned into every worker that must stop.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: Receiver<()>,
}

pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (AbortHandle { _tx: tx }, AbortSignal { rx })
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            rx: crossbeam_channel::never(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected) | Ok(()))
    }

    /// Sleep for up to `timeout`, returning early with `true` on abort.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// For use in `crossbeam_channel::select!`; becomes ready on abort.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_drop_aborts_all_clones() {
        let (handle, signal) = abort_pair();
        let other = signal.clone();
        assert!(!signal.is_aborted());
        drop(handle);
        assert!(signal.is_aborted());
        assert!(other.is_aborted());
    }

    #[test]
    fn test_wait_returns_early_on_abort() {
        let (handle, signal) = abort_pair();
        let t = std::thread::spawn(move || {
            let start = Instant::now();
            let aborted = signal.wait(Duration::from_secs(10));
            (aborted, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.abort();
        let (aborted, elapsed) = t.join().unwrap();
        assert!(aborted);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_never_times_out() {
        let signal = AbortSignal::never();
        assert!(!signal.is_aborted());
        assert!(!signal.wait(Duration::from_millis(5)));
    }
}
