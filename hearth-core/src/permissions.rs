//! Permission model: the capability tags a session may exercise.
//!
//! A [`ToolContext`](crate::types::ToolContext) carries a fixed
//! [`CapabilitySet`] decided at session start. Tools declare the tags they
//! require and the registry refuses to run them when any tag is missing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named permission a session may or may not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Spawning shell commands.
    Shell,
    /// Reading and writing user files.
    Filesystem,
    /// Outbound network access.
    Network,
    /// Process and host introspection.
    Process,
    /// Version-control operations (git).
    SourceControl,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Shell,
        Capability::Filesystem,
        Capability::Network,
        Capability::Process,
        Capability::SourceControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Shell => "shell",
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::Process => "process",
            Capability::SourceControl => "source-control",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" => Ok(Capability::Shell),
            "filesystem" | "fs" => Ok(Capability::Filesystem),
            "network" => Ok(Capability::Network),
            "process" => Ok(Capability::Process),
            "source-control" | "git" => Ok(Capability::SourceControl),
            other => Err(format!("unknown capability: {other}")),
        }
    }
}

/// An immutable set of granted capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// No capabilities at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every capability tag.
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether the context's session was granted `capability`.
pub fn has_capability(ctx: &crate::types::ToolContext, capability: Capability) -> bool {
    ctx.granted_capabilities.contains(capability)
}
