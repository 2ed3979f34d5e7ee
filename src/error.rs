//! Unified error type for tunnel operations.

use thiserror::Error;

use crate::probe::ProbeError;
use crate::settings::SettingsError;
use crate::tunnel::TunnelError;

/// Unified error for the manager's top-level operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local port allocation against the hop failed.
    #[error("local port allocation failed: {0}")]
    Probe(#[from] ProbeError),

    /// Spawning the SSH child or installing its rules failed.
    #[error("tunnel setup failed: {0}")]
    Tunnel(#[from] TunnelError),

    /// Settings could not be loaded.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::HostAddr;

    #[test]
    fn test_probe_error_converts() {
        let err: Error = ProbeError::WrongAddressFamily(HostAddr::new("hop", 22)).into();
        assert!(matches!(err, Error::Probe(_)));
        assert!(err.to_string().contains("hop"));
    }
}
