use shared::domain::SessionId;

use crate::error::SessionError;

/// Client-side lifecycle of one scan session.
///
/// ```text
/// idle -> scanning -> {completed, cancelled, failed}
/// scanning <-> paused, paused -> cancelled
/// {completed, cancelled, failed} -> idle   (reset)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Paused)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Scanning)
                | (
                    Self::Scanning,
                    Self::Paused | Self::Completed | Self::Cancelled | Self::Failed
                )
                | (Self::Paused, Self::Scanning | Self::Cancelled)
                | (Self::Completed | Self::Cancelled | Self::Failed, Self::Idle)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

pub(crate) fn checked_transition(
    current: &mut SessionStatus,
    next: SessionStatus,
) -> Result<(), SessionError> {
    if !current.can_transition_to(next) {
        return Err(SessionError::InvalidTransition {
            from: *current,
            to: next,
        });
    }
    *current = next;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionCorrelation {
    #[default]
    Detached,
    /// The start command is in flight and its identifier is not known yet.
    Pending,
    Known(SessionId),
}

impl SessionCorrelation {
    pub fn known(&self) -> Option<&SessionId> {
        match self {
            Self::Known(session_id) => Some(session_id),
            _ => None,
        }
    }

    pub fn accepts(&self, incoming: Option<&SessionId>) -> bool {
        match self {
            Self::Detached => false,
            Self::Pending => true,
            Self::Known(current) => incoming.map_or(true, |incoming| incoming == current),
        }
    }
}
