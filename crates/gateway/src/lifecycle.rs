use std::fmt;

use tracing::{debug, warn};

use crate::connection::ConnId;

/// Where a viewer connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Upgrading,
    Connected,
    Closing,
    Closed,
}

impl Phase {
    fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Pending, Phase::Upgrading)
                | (Phase::Upgrading, Phase::Connected)
                | (Phase::Upgrading, Phase::Closing)
                | (Phase::Connected, Phase::Closing)
                | (Phase::Closing, Phase::Closed)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::Upgrading => "upgrading",
            Phase::Connected => "connected",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Phase tracker for one connection. Only forward moves are accepted, so
/// `Closed` is reached at most once.
#[derive(Debug)]
pub struct Lifecycle {
    conn_id: ConnId,
    phase: Phase,
}

impl Lifecycle {
    pub fn new(conn_id: ConnId) -> Self {
        Self {
            conn_id,
            phase: Phase::Pending,
        }
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Returns false and leaves the phase unchanged if the
    /// transition is not allowed.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            warn!(conn_id = %self.conn_id, from = %self.phase, to = %next, "illegal phase transition");
            return false;
        }
        debug!(conn_id = %self.conn_id, from = %self.phase, to = %next, "phase change");
        self.phase = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_closed() {
        let mut lc = Lifecycle::new(ConnId(1));
        for next in [Phase::Upgrading, Phase::Connected, Phase::Closing, Phase::Closed] {
            assert!(lc.advance(next), "to {next}");
        }
        assert_eq!(lc.phase(), Phase::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let mut lc = Lifecycle::new(ConnId(1));
        lc.advance(Phase::Upgrading);
        lc.advance(Phase::Closing);
        assert!(lc.advance(Phase::Closed));
        assert!(!lc.advance(Phase::Closed));
        assert!(!lc.advance(Phase::Connected));
        assert_eq!(lc.phase(), Phase::Closed);
    }

    #[test]
    fn skipping_phases_is_refused() {
        let mut lc = Lifecycle::new(ConnId(1));
        assert!(!lc.advance(Phase::Connected));
        assert!(!lc.advance(Phase::Closed));
        assert_eq!(lc.phase(), Phase::Pending);

        lc.advance(Phase::Upgrading);
        lc.advance(Phase::Connected);
        assert!(!lc.advance(Phase::Upgrading));
        assert!(!lc.advance(Phase::Closed));
        assert_eq!(lc.phase(), Phase::Connected);
    }
}
