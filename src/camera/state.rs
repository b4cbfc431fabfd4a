use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Unbound,
    Binding,
    Bound,
    Unbinding,
    Error,
}

impl SessionState {
    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unbound, Binding)
                | (Binding, Bound)
                | (Binding, Error)
                | (Bound, Unbinding)
                | (Bound, Error)
                | (Unbinding, Unbound)
                | (Error, Unbound)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unbound => "unbound",
            SessionState::Binding => "binding",
            SessionState::Bound => "bound",
            SessionState::Unbinding => "unbinding",
            SessionState::Error => "error",
        };
        write!(f, "{}", name)
    }
}
