use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The number of replica acknowledgements a write must collect before it is
/// reported successful to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsistencyLevel {
    /// Allows for hinted handoff: a durable enqueue for an unreachable owner
    /// counts as a write.
    Any,
    /// At least one replica must acknowledge.
    One,
    /// A majority of replicas must acknowledge.
    Quorum,
    /// Every replica must acknowledge.
    All,
}

impl ConsistencyLevel {
    /// The number of owner acknowledgements required for a shard with
    /// `replicas` owners.
    pub fn required_acks(&self, replicas: usize) -> usize {
        match self {
            Self::Any | Self::One => 1,
            Self::Quorum => replicas / 2 + 1,
            Self::All => replicas,
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::One => write!(f, "one"),
            Self::Quorum => write!(f, "quorum"),
            Self::All => write!(f, "all"),
        }
    }
}

/// The error returned when parsing an unrecognised consistency level.
#[derive(Debug, Error)]
#[error("invalid consistency level: {value}")]
pub struct InvalidConsistencyLevel {
    value: String,
}

impl FromStr for ConsistencyLevel {
    type Err = InvalidConsistencyLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "one" => Ok(Self::One),
            "quorum" => Ok(Self::Quorum),
            "all" => Ok(Self::All),
            _ => Err(InvalidConsistencyLevel {
                value: s.to_string(),
            }),
        }
    }
}
