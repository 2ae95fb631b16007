//! Supervisor lifecycle states

use serde::Serialize;

/// Where a supervisor is in its launch lifecycle
///
/// States only move forward. `Closed` is absorbing and reachable from any
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    #[default]
    Idle,
    Connecting,
    Subscribing,
    Starting,
    Active,
    Closed,
}

impl SupervisorState {
    fn rank(&self) -> u8 {
        match self {
            SupervisorState::Idle => 0,
            SupervisorState::Connecting => 1,
            SupervisorState::Subscribing => 2,
            SupervisorState::Starting => 3,
            SupervisorState::Active => 4,
            SupervisorState::Closed => 5,
        }
    }

    /// Whether moving to `next` is a legal forward transition
    pub fn can_advance_to(&self, next: SupervisorState) -> bool {
        if self.is_closed() {
            return false;
        }
        next.rank() > self.rank()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SupervisorState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Subscribing => "subscribing",
            SupervisorState::Starting => "starting",
            SupervisorState::Active => "active",
            SupervisorState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SupervisorState; 6] = [
        SupervisorState::Idle,
        SupervisorState::Connecting,
        SupervisorState::Subscribing,
        SupervisorState::Starting,
        SupervisorState::Active,
        SupervisorState::Closed,
    ];

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(SupervisorState::Idle.can_advance_to(SupervisorState::Connecting));
        assert!(SupervisorState::Connecting.can_advance_to(SupervisorState::Subscribing));
        assert!(SupervisorState::Starting.can_advance_to(SupervisorState::Active));
    }

    #[test]
    fn test_never_moves_backward() {
        for (i, from) in ALL.iter().enumerate() {
            for to in &ALL[..=i] {
                assert!(!from.can_advance_to(*to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_any_open_state_can_close() {
        for state in &ALL[..5] {
            assert!(state.can_advance_to(SupervisorState::Closed));
        }
    }

    #[test]
    fn test_closed_is_absorbing() {
        for to in ALL {
            assert!(!SupervisorState::Closed.can_advance_to(to));
        }
    }

    #[test]
    fn test_default_is_idle() {
        assert_eq!(SupervisorState::default(), SupervisorState::Idle);
        assert_eq!(SupervisorState::Active.to_string(), "active");
    }
}
