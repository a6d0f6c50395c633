/// Service-side view of the session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycle {
    Idle,
    Starting,
    Active,
    Closing,
    Restoring,
}

impl SessionLifecycle {
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

pub fn can_transition(from: SessionLifecycle, to: SessionLifecycle) -> bool {
    matches!(
        (from, to),
        (SessionLifecycle::Idle, SessionLifecycle::Starting)
            | (SessionLifecycle::Starting, SessionLifecycle::Active)
            | (SessionLifecycle::Starting, SessionLifecycle::Restoring)
            | (SessionLifecycle::Active, SessionLifecycle::Closing)
            | (SessionLifecycle::Active, SessionLifecycle::Restoring)
            | (SessionLifecycle::Closing, SessionLifecycle::Restoring)
            | (SessionLifecycle::Restoring, SessionLifecycle::Idle)
    ) || from == to
}
