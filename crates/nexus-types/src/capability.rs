//! Named capability grants with resource patterns and optional expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named grant of a set of actions on a resource pattern.
///
/// `resource_pattern` uses glob metacharacters: `*` matches within a
/// path/key segment, `**` matches across separators. Matches are anchored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub resource_pattern: String,
    pub actions: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        resource_pattern: impl Into<String>,
        actions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_pattern: resource_pattern.into(),
            actions: actions.into_iter().collect(),
            expires_at: None,
        }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// True once the expiry timestamp, if any, has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn allows_action(&self, action: &str) -> bool {
        self.actions.contains(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn capability_without_expiry_never_expires() {
        let cap = Capability::new("fs-read", "/var/log/**", vec!["fs:read".to_string()]);
        assert!(!cap.is_expired(Utc::now()));
        assert!(cap.allows_action("fs:read"));
        assert!(!cap.allows_action("fs:write"));
    }

    #[test]
    fn capability_expires() {
        let past = Utc::now() - Duration::seconds(5);
        let cap =
            Capability::new("tmp", "/tmp/**", vec!["fs:write".to_string()]).expiring(past);
        assert!(cap.is_expired(Utc::now()));
    }
}
