//! Execution strategies.
//!
//! Only the two strategies the engine actually implements are modeled here;
//! `host_pinned` and other worker-affinity variants are a teacher idiom for
//! a scheduler shape this engine does not need.

use serde::{Deserialize, Serialize};

/// How a play schedules its tasks across hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Run each task to completion on every host before starting the next
    /// task; a barrier follows every task.
    Linear,
    /// Each host runs through the whole per-host task pipeline at its own
    /// pace, with no barrier until the play ends.
    Free,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Linear
    }
}

impl std::str::FromStr for Strategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "free" => Ok(Self::Free),
            other => Err(crate::error::Error::Config(format!(
                "unknown execution strategy '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Free => write!(f, "free"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_strategies() {
        assert_eq!("linear".parse::<Strategy>().unwrap(), Strategy::Linear);
        assert_eq!("free".parse::<Strategy>().unwrap(), Strategy::Free);
        assert!("bogus".parse::<Strategy>().is_err());
    }
}
