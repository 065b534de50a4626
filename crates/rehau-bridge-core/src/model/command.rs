// ── Command model ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use super::ZoneId;

/// Numeric writes closer than this to the current value have no effect.
pub const NO_OP_EPSILON: f64 = 0.1;

/// What a command writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandKind {
    Temperature,
    Mode,
    Preset,
    RingLight,
    Lock,
}

/// A command's requested (or observed) value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandValue {
    /// Celsius.
    Temperature(f64),
    /// Vendor enumeration code (mode, preset).
    Code(u32),
    Flag(bool),
}

impl CommandValue {
    /// `true` when writing `self` over `current` would change nothing.
    pub fn is_no_op(&self, current: &Self) -> bool {
        match (self, current) {
            (Self::Temperature(new), Self::Temperature(old)) => (new - old).abs() < NO_OP_EPSILON,
            _ => self == current,
        }
    }
}

impl std::fmt::Display for CommandValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temperature(t) => write!(f, "{t:.1}"),
            Self::Code(c) => write!(f, "{c}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

/// Lifecycle of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Confirmed,
    Rejected,
    Timeout,
    NoChange,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Bookkeeping for one command, kept until purged after its terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub id: Uuid,
    pub zone: ZoneId,
    pub installation: String,
    pub kind: CommandKind,
    pub old_value: Option<CommandValue>,
    pub new_value: CommandValue,
    pub is_no_op: bool,
    pub status: CommandStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency: Option<Duration>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_no_op_uses_epsilon() {
        let current = CommandValue::Temperature(20.0);
        assert!(CommandValue::Temperature(20.05).is_no_op(&current));
        assert!(CommandValue::Temperature(20.0).is_no_op(&current));
        assert!(!CommandValue::Temperature(21.0).is_no_op(&current));
        assert!(!CommandValue::Temperature(20.1).is_no_op(&current));
    }

    #[test]
    fn codes_and_flags_compare_exactly() {
        assert!(CommandValue::Code(3).is_no_op(&CommandValue::Code(3)));
        assert!(!CommandValue::Code(3).is_no_op(&CommandValue::Code(1)));
        assert!(CommandValue::Flag(true).is_no_op(&CommandValue::Flag(true)));
        assert!(!CommandValue::Flag(true).is_no_op(&CommandValue::Code(1)));
    }

    #[test]
    fn kind_strings() {
        assert_eq!(CommandKind::RingLight.to_string(), "ring_light");
        assert_eq!("lock".parse::<CommandKind>().ok(), Some(CommandKind::Lock));
        assert_eq!(CommandStatus::NoChange.to_string(), "no_change");
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(CommandStatus::Timeout.is_terminal());
    }
}
