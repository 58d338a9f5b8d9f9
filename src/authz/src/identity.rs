//! Acting identities and group resolution

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Handle of the user performing an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Principal name, e.g. `alice` or `alice@EXAMPLE.COM`
    pub name: String,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name without a Kerberos realm or host component
    pub fn short_name(&self) -> &str {
        self.name
            .split(|c| c == '@' || c == '/')
            .next()
            .unwrap_or(&self.name)
    }
}

/// Resolves display names and group membership for identities
///
/// Must be safe to call from many sessions at once.
pub trait GroupResolver: Send + Sync {
    /// Name used in requests, audit records and denial messages
    fn display_name(&self, identity: &Identity) -> String {
        identity.short_name().to_string()
    }

    /// Group set of an identity; empty for an absent identity
    fn groups(&self, identity: Option<&Identity>) -> BTreeSet<String>;
}

/// In-memory user → groups table
#[derive(Debug, Default)]
pub struct StaticGroupResolver {
    groups: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, keyed by short name
    pub fn with_user<I, S>(self, user: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_groups(user, groups);
        self
    }

    /// Replace the groups of a user
    pub fn set_groups<I, S>(&self, user: impl Into<String>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: BTreeSet<String> = groups.into_iter().map(Into::into).collect();
        self.groups.write().insert(user.into(), groups);
    }
}

impl GroupResolver for StaticGroupResolver {
    fn groups(&self, identity: Option<&Identity>) -> BTreeSet<String> {
        let Some(identity) = identity else {
            return BTreeSet::new();
        };
        self.groups
            .read()
            .get(identity.short_name())
            .cloned()
            .unwrap_or_default()
    }
}
