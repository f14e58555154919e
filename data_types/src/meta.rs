use std::time::Duration;

/// Metadata for a database known to the meta store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// The database name.
    pub name: String,
    /// The retention policy used when a write names none.
    pub default_retention_policy: String,
}

/// Metadata for a retention policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicyInfo {
    /// The retention policy name.
    pub name: String,
    /// How long data written under this policy is kept. A zero duration keeps
    /// data forever.
    pub duration: Duration,
    /// The width of the time interval each shard group spans.
    pub shard_group_duration: Duration,
}

impl RetentionPolicyInfo {
    /// Returns true when this policy never expires data.
    pub fn is_infinite(&self) -> bool {
        self.duration.is_zero()
    }
}
