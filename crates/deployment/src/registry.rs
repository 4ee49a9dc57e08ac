//! Driver kind enumeration and the image rewrite table (§3.1, §4.1, §9
//! "Lazy plugin loading").
//!
//! The original gated optional backends behind import-time fallback
//! (instantiate on first use, fail deep in a request handler if the
//! dependency wasn't installed). This is re-architected as an explicit
//! registry: [`DriverKind`] is a closed enum, and whatever maps each kind
//! to a concrete [`crate::BackendDriver`] (in the `local-deployment` crate)
//! does so once at process startup, erroring at configuration-parse time —
//! never at first request — if a selected kind's prerequisites are absent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    LocalDocker,
    Kubernetes,
    /// AgentRun-equivalent managed serverless runtime.
    ManagedRuntimeA,
    /// FC-equivalent managed serverless runtime.
    ManagedRuntimeB,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriverKind::LocalDocker => "docker",
            DriverKind::Kubernetes => "k8s",
            DriverKind::ManagedRuntimeA => "agentrun",
            DriverKind::ManagedRuntimeB => "fc",
        };
        write!(f, "{s}")
    }
}

/// Maps a canonical image reference to a concrete, backend-specific
/// registry reference (§4.1 "Image rewriting"). Decouples logical image
/// names from registry layout so cluster backends can target mirrored
/// registries without the manager knowing about it.
#[derive(Debug, Clone, Default)]
pub struct ImageRewriteTable {
    rules: HashMap<String, String>,
}

impl ImageRewriteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, canonical: impl Into<String>, concrete: impl Into<String>) -> Self {
        self.rules.insert(canonical.into(), concrete.into());
        self
    }

    /// Returns the concrete image for `canonical`, falling back to the
    /// canonical reference unchanged if no rule matches (local daemons
    /// resolve canonical names directly against their local cache).
    pub fn rewrite(&self, canonical: &str) -> String {
        self.rules
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_falls_back_to_canonical() {
        let table = ImageRewriteTable::new();
        assert_eq!(table.rewrite("agentscope/base:latest"), "agentscope/base:latest");
    }

    #[test]
    fn rewrite_applies_rule() {
        let table = ImageRewriteTable::new()
            .with_rule("agentscope/base:latest", "registry.mirror.internal/agentscope/base:latest");
        assert_eq!(
            table.rewrite("agentscope/base:latest"),
            "registry.mirror.internal/agentscope/base:latest"
        );
    }
}
