//! Status lifecycle machines for epics and stories.
//!
//! Stories may be set to any of their four states by an explicit update;
//! the only derived transition is ToDo → InProgress when a story is claimed.
//! Epics may likewise be set to any of their five states. Putting an epic
//! OnHold records the state it was paused from.

use serde::{Deserialize, Serialize};

use crate::normalize_name;

/// Which state machine a status error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    /// Epic status
    Epic,
    /// Story status
    Story,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Epic => f.write_str("epic"),
            Self::Story => f.write_str("story"),
        }
    }
}

/// Errors raised by the lifecycle machines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// The status name is not one of the machine's states.
    #[error("invalid {kind} status '{value}'")]
    InvalidStatus {
        /// Machine the value was meant for
        kind: StatusKind,
        /// The rejected value
        value: String,
    },
}

/// Story status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoryStatus {
    /// Not started
    ToDo,
    /// Claimed by a developer agent
    InProgress,
    /// Awaiting review
    Review,
    /// Finished; dependents are unblocked
    Done,
}

impl StoryStatus {
    /// All story states in lifecycle order.
    pub const ALL: [StoryStatus; 4] = [
        StoryStatus::ToDo,
        StoryStatus::InProgress,
        StoryStatus::Review,
        StoryStatus::Done,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToDo => "ToDo",
            Self::InProgress => "InProgress",
            Self::Review => "Review",
            Self::Done => "Done",
        }
    }

    /// Whether a dependency on a story in this state is satisfied.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "todo" => Ok(Self::ToDo),
            "inprogress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(StatusError::InvalidStatus {
                kind: StatusKind::Story,
                value: s.to_string(),
            }),
        }
    }
}

/// Epic status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpicStatus {
    /// Being written
    Draft,
    /// Groomed and ready to be worked
    Ready,
    /// Stories are being worked
    InProgress,
    /// Finished
    Done,
    /// Paused; resumes to the state it was paused from
    OnHold,
}

impl EpicStatus {
    /// All epic states.
    pub const ALL: [EpicStatus; 5] = [
        EpicStatus::Draft,
        EpicStatus::Ready,
        EpicStatus::InProgress,
        EpicStatus::Done,
        EpicStatus::OnHold,
    ];

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Ready => "Ready",
            Self::InProgress => "InProgress",
            Self::Done => "Done",
            Self::OnHold => "OnHold",
        }
    }

    /// Compute the state an epic lands in when set to `target`.
    ///
    /// Any state may be named. `paused_from` is the state recorded when
    /// the epic was put on hold; the new `(status, paused_from)` pair is
    /// returned.
    pub fn transition(
        self,
        paused_from: Option<EpicStatus>,
        target: EpicStatus,
    ) -> (EpicStatus, Option<EpicStatus>) {
        match target {
            _ if target == self => (self, paused_from),
            EpicStatus::OnHold => (EpicStatus::OnHold, Some(self)),
            next => (next, None),
        }
    }
}

impl std::fmt::Display for EpicStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EpicStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "inprogress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "onhold" => Ok(Self::OnHold),
            _ => Err(StatusError::InvalidStatus {
                kind: StatusKind::Epic,
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_status_parsing_is_lenient_about_spelling() {
        assert_eq!("ToDo".parse::<StoryStatus>().unwrap(), StoryStatus::ToDo);
        assert_eq!("to do".parse::<StoryStatus>().unwrap(), StoryStatus::ToDo);
        assert_eq!("IN_PROGRESS".parse::<StoryStatus>().unwrap(), StoryStatus::InProgress);
        assert_eq!("in-progress".parse::<StoryStatus>().unwrap(), StoryStatus::InProgress);
        assert_eq!("review".parse::<StoryStatus>().unwrap(), StoryStatus::Review);
        assert_eq!("Done".parse::<StoryStatus>().unwrap(), StoryStatus::Done);
    }

    #[test]
    fn test_unknown_story_status_is_rejected() {
        let err = "Blocked".parse::<StoryStatus>().unwrap_err();
        assert_eq!(
            err,
            StatusError::InvalidStatus {
                kind: StatusKind::Story,
                value: "Blocked".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_epic_status_is_rejected() {
        assert!(matches!(
            "Archived".parse::<EpicStatus>(),
            Err(StatusError::InvalidStatus { kind: StatusKind::Epic, .. })
        ));
        assert_eq!("on hold".parse::<EpicStatus>().unwrap(), EpicStatus::OnHold);
    }

    #[test]
    fn test_epic_accepts_any_named_state() {
        let (s, p) = EpicStatus::Draft.transition(None, EpicStatus::Ready);
        assert_eq!((s, p), (EpicStatus::Ready, None));
        let (s, _) = s.transition(None, EpicStatus::Done);
        assert_eq!(s, EpicStatus::Done);

        // A finished epic can be reopened.
        let (s, _) = s.transition(None, EpicStatus::InProgress);
        assert_eq!(s, EpicStatus::InProgress);
        let (s, _) = s.transition(None, EpicStatus::Draft);
        assert_eq!(s, EpicStatus::Draft);
    }

    #[test]
    fn test_same_state_keeps_pause_record() {
        let pair = EpicStatus::OnHold.transition(Some(EpicStatus::Ready), EpicStatus::OnHold);
        assert_eq!(pair, (EpicStatus::OnHold, Some(EpicStatus::Ready)));
    }

    #[test]
    fn test_on_hold_records_paused_state() {
        let (s, p) = EpicStatus::Ready.transition(None, EpicStatus::OnHold);
        assert_eq!((s, p), (EpicStatus::OnHold, Some(EpicStatus::Ready)));

        let (s, p) = s.transition(p, EpicStatus::InProgress);
        assert_eq!((s, p), (EpicStatus::InProgress, None));

        let (s, p) = EpicStatus::Done.transition(None, EpicStatus::OnHold);
        assert_eq!((s, p), (EpicStatus::OnHold, Some(EpicStatus::Done)));
    }
}
