//! Critical-section signal masking.
//!
//! Tunnel creation and removal couple a forked child, kernel rule state,
//! and the registry; a termination signal landing between those steps
//! would strand a rule or a child. The guard blocks the termination
//! signals on the calling thread for the duration of the side-effecting
//! steps and restores the previous mask on drop. Children inherit the
//! blocked mask at fork; the child's pre-exec hook unblocks the full set
//! before exec (see the tunnel command builder).

use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use tracing::warn;

/// The conventional terminate family masked around critical sections.
///
/// Embedders installing an outer shutdown handler should cover the same
/// set.
pub fn shutdown_signals() -> [Signal; 3] {
    [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM]
}

/// Blocks a signal set on the current thread until dropped.
pub(crate) struct SignalGuard {
    previous: Option<SigSet>,
}

impl SignalGuard {
    /// Block the given signals, remembering the previous mask.
    ///
    /// Mask manipulation failing is exotic; it is logged and the guard
    /// degrades to a no-op rather than aborting the operation.
    pub(crate) fn block(signals: &[Signal]) -> Self {
        let mut mask = SigSet::empty();
        for signal in signals {
            mask.add(*signal);
        }

        let mut previous = SigSet::empty();
        match pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&mask), Some(&mut previous)) {
            Ok(()) => Self {
                previous: Some(previous),
            },
            Err(e) => {
                warn!("Failed to block termination signals: {}", e);
                Self { previous: None }
            }
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None) {
                warn!("Failed to restore signal mask: {}", e);
            }
        }
    }
}
