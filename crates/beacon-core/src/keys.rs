//! Subscription keys.
//!
//! A subscription is identified by its text *and* its kind: the broker
//! treats a channel named `user:1` and a pattern spelled `user:1` as two
//! independent subscriptions, so the registry does too.

use serde::{Deserialize, Serialize};

/// Whether a subscription targets an exact channel or a glob pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Exact-match channel name.
    Channel,
    /// Glob-style pattern matching multiple channel names.
    Pattern,
}

impl SubscriptionKind {
    /// Short label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Pattern => "pattern",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged subscription key: kind + name.
///
/// Equality and hashing include the kind, keeping the channel and pattern
/// namespaces disjoint even when the text is identical.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Channel or pattern.
    pub kind: SubscriptionKind,
    /// The channel name or pattern expression.
    pub name: String,
}

impl SubscriptionKey {
    /// Create a channel key.
    pub fn channel(name: impl Into<String>) -> Self {
        Self {
            kind: SubscriptionKind::Channel,
            name: name.into(),
        }
    }

    /// Create a pattern key.
    pub fn pattern(name: impl Into<String>) -> Self {
        Self {
            kind: SubscriptionKind::Pattern,
            name: name.into(),
        }
    }

    /// Create a key with an explicit kind.
    pub fn new(kind: SubscriptionKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn kind_labels() {
        assert_eq!(SubscriptionKind::Channel.as_str(), "channel");
        assert_eq!(SubscriptionKind::Pattern.as_str(), "pattern");
    }

    #[test]
    fn same_text_different_kind_are_distinct() {
        let ch = SubscriptionKey::channel("user:1");
        let pat = SubscriptionKey::pattern("user:1");
        assert_ne!(ch, pat);

        let mut set = HashSet::new();
        assert!(set.insert(ch));
        assert!(set.insert(pat));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(SubscriptionKey::channel("a").kind, SubscriptionKind::Channel);
        assert_eq!(SubscriptionKey::pattern("a*").kind, SubscriptionKind::Pattern);
        assert_eq!(
            SubscriptionKey::new(SubscriptionKind::Pattern, "x?").kind,
            SubscriptionKind::Pattern
        );
    }

    #[test]
    fn display_includes_kind() {
        let key = SubscriptionKey::pattern("user:*");
        assert_eq!(key.to_string(), "pattern:user:*");
    }

    #[test]
    fn kind_serde_snake_case() {
        let json = serde_json::to_value(SubscriptionKind::Channel).unwrap();
        assert_eq!(json, serde_json::json!("channel"));
        let back: SubscriptionKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, SubscriptionKind::Channel);
    }
}
