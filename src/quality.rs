//! Network quality classification.

use crate::link::{IceState, LinkConnectionState};
use crate::types::NetworkState;

/// Maps the peer link's raw `(connection, ice)` state pair into the
/// coarse [`NetworkState`] the UI consumes.
///
/// Stateful so that only changes are reported; it runs on every link
/// state change for the lifetime of the call and stops the instant the
/// session is destroyed.
#[derive(Debug)]
pub struct NetworkQualityMonitor {
    current: NetworkState,
}

impl NetworkQualityMonitor {
    pub fn new() -> Self {
        Self {
            current: NetworkState::Good,
        }
    }

    pub fn current(&self) -> NetworkState {
        self.current
    }

    /// Classify one state pair. ICE disconnection or outright
    /// connection failure means the call is trying to recover;
    /// anything else reads as healthy. `Poor` and `Lost` are reserved
    /// for signal-quality heuristics not driven by connection state.
    pub fn classify(connection: LinkConnectionState, ice: IceState) -> NetworkState {
        if ice == IceState::Disconnected || connection == LinkConnectionState::Failed {
            NetworkState::Reconnecting
        } else {
            NetworkState::Good
        }
    }

    /// Feed one state change. Returns the new network state if it
    /// differs from the last reported one.
    pub fn observe(
        &mut self,
        connection: LinkConnectionState,
        ice: IceState,
    ) -> Option<NetworkState> {
        let next = Self::classify(connection, ice);
        if next != self.current {
            self.current = next;
            Some(next)
        } else {
            None
        }
    }
}

impl Default for NetworkQualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_mapping() {
        assert_eq!(
            NetworkQualityMonitor::classify(LinkConnectionState::Connected, IceState::Disconnected),
            NetworkState::Reconnecting
        );
        assert_eq!(
            NetworkQualityMonitor::classify(LinkConnectionState::Failed, IceState::Connected),
            NetworkState::Reconnecting
        );
    }

    #[test]
    fn test_healthy_mapping() {
        assert_eq!(
            NetworkQualityMonitor::classify(LinkConnectionState::Connected, IceState::Connected),
            NetworkState::Good
        );
        assert_eq!(
            NetworkQualityMonitor::classify(LinkConnectionState::Connecting, IceState::Checking),
            NetworkState::Good
        );
    }

    #[test]
    fn test_observe_reports_changes_only() {
        let mut monitor = NetworkQualityMonitor::new();
        assert_eq!(
            monitor.observe(LinkConnectionState::Connected, IceState::Connected),
            None
        );
        assert_eq!(
            monitor.observe(LinkConnectionState::Connected, IceState::Disconnected),
            Some(NetworkState::Reconnecting)
        );
        assert_eq!(
            monitor.observe(LinkConnectionState::Connected, IceState::Disconnected),
            None
        );
        assert_eq!(
            monitor.observe(LinkConnectionState::Connected, IceState::Connected),
            Some(NetworkState::Good)
        );
    }
}
