use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by executions and their file-level sub-units.
///
/// Forward order: `Pending → Initiated → Queued → Ready → Executing` and then
/// one of the terminal states `Completed`, `Stopped`, `Error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Initiated,
    /// Handed to a queue, no worker has picked it up yet.
    Queued,
    /// Dequeued by a worker, about to execute.
    Ready,
    Executing,
    Completed,
    /// Cancelled by an operator. Not a failure.
    Stopped,
    Error,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 8] = [
        Self::Pending,
        Self::Initiated,
        Self::Queued,
        Self::Ready,
        Self::Executing,
        Self::Completed,
        Self::Stopped,
        Self::Error,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Initiated => "INITIATED",
            Self::Queued => "QUEUED",
            Self::Ready => "READY",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error)
    }

    /// Position in the forward order. Terminal states share the last rank.
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Initiated => 1,
            Self::Queued => 2,
            Self::Ready => 3,
            Self::Executing => 4,
            Self::Completed | Self::Stopped | Self::Error => 5,
        }
    }

    /// Forward jumps are allowed (a file may fail before it ever executes),
    /// backward jumps and anything out of a terminal state are not.
    /// Re-applying the current state is treated as valid so retried
    /// deliveries stay idempotent.
    pub fn can_transition_to(self, target: Self) -> bool {
        if self == target {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        target.rank() > self.rank()
    }

    /// Resolve any accepted representation to the canonical variant.
    pub fn parse<'a>(value: impl Into<StatusValue<'a>>) -> Result<Self, InvalidStatusValue> {
        match value.into() {
            StatusValue::Canonical(status) => Ok(status),
            StatusValue::Text(raw) => Self::from_str(raw),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = InvalidStatusValue;

    /// Accepts `PENDING`, `pending` and the `ExecutionStatus.PENDING` form
    /// that shows up after an enum is stringified on the way through a queue.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let name = match trimmed.split_once('.') {
            Some((prefix, rest)) if prefix.eq_ignore_ascii_case("ExecutionStatus") => rest,
            Some(_) => return Err(InvalidStatusValue::new(raw)),
            None => trimmed,
        };
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
            .ok_or_else(|| InvalidStatusValue::new(raw))
    }
}

/// The shapes a status can arrive in at an integration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusValue<'a> {
    Canonical(ExecutionStatus),
    Text(&'a str),
}

impl From<ExecutionStatus> for StatusValue<'_> {
    fn from(value: ExecutionStatus) -> Self {
        StatusValue::Canonical(value)
    }
}

impl<'a> From<&'a str> for StatusValue<'a> {
    fn from(value: &'a str) -> Self {
        StatusValue::Text(value)
    }
}

impl<'a> From<&'a String> for StatusValue<'a> {
    fn from(value: &'a String) -> Self {
        StatusValue::Text(value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid execution status value: {value:?}")]
pub struct InvalidStatusValue {
    pub value: String,
}

impl InvalidStatusValue {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_all_accepted_shapes() {
        let expected = ExecutionStatus::Pending;
        assert_eq!(ExecutionStatus::parse("PENDING"), Ok(expected));
        assert_eq!(ExecutionStatus::parse("pending"), Ok(expected));
        assert_eq!(ExecutionStatus::parse("ExecutionStatus.PENDING"), Ok(expected));
        assert_eq!(ExecutionStatus::parse(" Executing "), Ok(ExecutionStatus::Executing));
        assert_eq!(ExecutionStatus::parse(expected), Ok(expected));
    }

    #[test]
    fn rejects_unknown_and_lookalike_values() {
        for raw in ["", "DONE", "xPENDING", "PENDINGS", "Status.PENDING", "ExecutionStatus."] {
            let err = ExecutionStatus::parse(raw).unwrap_err();
            assert_eq!(err.value, raw);
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [ExecutionStatus::Completed, ExecutionStatus::Stopped, ExecutionStatus::Error] {
            for to in ExecutionStatus::ALL {
                assert_eq!(from.can_transition_to(to), from == to, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&ExecutionStatus::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
        let back: ExecutionStatus = serde_json::from_str("\"ERROR\"").unwrap();
        assert_eq!(back, ExecutionStatus::Error);
    }

    proptest! {
        #[test]
        fn display_round_trips_in_any_case(idx in 0usize..8, lower in any::<bool>()) {
            let status = ExecutionStatus::ALL[idx];
            let text = if lower { status.as_str().to_lowercase() } else { status.to_string() };
            prop_assert_eq!(ExecutionStatus::parse(text.as_str()), Ok(status));
            let prefixed = format!("ExecutionStatus.{text}");
            prop_assert_eq!(ExecutionStatus::parse(prefixed.as_str()), Ok(status));
        }
    }
}
