//! Shared data model (§3): the `Container` record and the sandbox type →
//! image enumeration. These types cross crate boundaries (drivers produce
//! them, the manager indexes them, the HTTP facade serializes them) so they
//! live in `db` rather than any one layer.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The closed sandbox-type enumeration, with a catch-all for extensibility
/// (§3). Serializes/deserializes as a bare lowercase string so the wire
/// shape matches the original's string-valued `sandbox_type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SandboxType {
    Base,
    Filesystem,
    Browser,
    Gui,
    Custom(String),
}

impl Serialize for SandboxType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SandboxType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "base" => SandboxType::Base,
            "filesystem" => SandboxType::Filesystem,
            "browser" => SandboxType::Browser,
            "gui" => SandboxType::Gui,
            other => SandboxType::Custom(other.to_string()),
        })
    }
}

impl std::fmt::Display for SandboxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxType::Base => write!(f, "base"),
            SandboxType::Filesystem => write!(f, "filesystem"),
            SandboxType::Browser => write!(f, "browser"),
            SandboxType::Gui => write!(f, "gui"),
            SandboxType::Custom(s) => write!(f, "{s}"),
        }
    }
}

impl SandboxType {
    /// Parses a bare type name the same way the `Deserialize` impl does,
    /// for callers (the warm-pool seeder, CLI args) that have a plain
    /// `&str` rather than a JSON value.
    pub fn from_name(name: &str) -> Self {
        match name {
            "base" => SandboxType::Base,
            "filesystem" => SandboxType::Filesystem,
            "browser" => SandboxType::Browser,
            "gui" => SandboxType::Gui,
            other => SandboxType::Custom(other.to_string()),
        }
    }

    /// The canonical image reference before any backend rewrite table is
    /// applied (§3, §4.1 "Image rewriting").
    pub fn canonical_image(&self) -> String {
        match self {
            SandboxType::Base => "agentscope/runtime-sandbox-base:latest".to_string(),
            SandboxType::Filesystem => "agentscope/runtime-sandbox-filesystem:latest".to_string(),
            SandboxType::Browser => "agentscope/runtime-sandbox-browser:latest".to_string(),
            SandboxType::Gui => "agentscope/runtime-sandbox-gui:latest".to_string(),
            SandboxType::Custom(name) => format!("agentscope/runtime-sandbox-{name}:latest"),
        }
    }
}

/// One exposed port, either a bare host port or a `"port/path"` form used by
/// path-routed managed-runtime backends (§3, §9 Open Questions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Port(u16),
    PathRouted(String),
}

/// A live sandbox (§3 "Container record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub session_id: String,
    pub container_id: String,
    pub container_name: String,
    pub url: String,
    pub ports: Vec<PortEntry>,
    pub mount_dir: Option<String>,
    pub storage_path: Option<String>,
    pub runtime_token: String,
    pub version: Option<String>,
    pub meta: HashMap<String, serde_json::Value>,
    pub timeout: Option<u64>,
    /// Explicit path field, preferred over encoding inside `ports` for
    /// managed-runtime backends (§9 Open Questions resolution).
    pub path: Option<String>,
}

impl Container {
    pub fn host_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter_map(|p| match p {
                PortEntry::Port(n) => Some(*n),
                PortEntry::PathRouted(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Creating,
    Running,
    Exited,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_image_for_custom_type() {
        let t = SandboxType::Custom("gpu".to_string());
        assert_eq!(t.canonical_image(), "agentscope/runtime-sandbox-gpu:latest");
        assert_eq!(t.to_string(), "gpu");
    }

    #[test]
    fn host_ports_filters_path_routed() {
        let c = Container {
            session_id: "s1".into(),
            container_id: "c1".into(),
            container_name: "n1".into(),
            url: "https://host".into(),
            ports: vec![PortEntry::Port(8080), PortEntry::PathRouted("443/abc".into())],
            mount_dir: None,
            storage_path: None,
            runtime_token: "tok".into(),
            version: None,
            meta: HashMap::new(),
            timeout: None,
            path: Some("/abc".into()),
        };
        assert_eq!(c.host_ports(), vec![8080]);
    }
}
