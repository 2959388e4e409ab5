use crate::ConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shared descriptor header carried by every project component.
///
/// `machine_name` is the stable identifier: filename-safe, lowercased,
/// `[a-z0-9_-]`, unique within its kind inside a project. `name` is free
/// human text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Component {
    pub kind: String,
    pub name: String,
    pub machine_name: String,
    pub description: String,
}

impl Component {
    pub fn new(kind: impl Into<String>, machine_name: impl Into<String>) -> Self {
        let machine_name = machine_name.into();
        Self {
            kind: kind.into(),
            name: machine_name.clone(),
            machine_name,
            description: String::new(),
        }
    }
}

/// Check a machine name against the `[a-z0-9_-]` contract.
pub fn valid_machine_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// A data store a migration can read from or write to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Database {
    pub component: Component,
    /// Name of a registered driver factory.
    pub driver: String,
    /// Optional tunnel machine name this database is reached through.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tunnel: String,
    pub configuration: ConfigMap,
}

/// A host/port pair at one end of a tunnel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Tunnel authentication. Credentials come from the host's SSH agent; only
/// the user name is carried in the project file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelAuth {
    pub user: String,
}

/// An SSH local port-forward description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tunnel {
    pub component: Component,
    /// Local listener endpoint.
    pub local: Endpoint,
    /// SSH server to dial.
    pub server: Endpoint,
    /// Endpoint reached from the SSH server.
    pub remote: Endpoint,
    pub auth: TunnelAuth,
}

/// A named pipeline from one database+query to another, with an optional
/// per-record transformation script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Migration {
    pub component: Component,
    /// Source database machine name.
    pub source_db: String,
    /// Destination database machine name.
    pub destination_db: String,
    pub source_query: String,
    /// Exact number of positional args the source query expects; must equal
    /// the length of the args slice passed at run time.
    pub source_query_n_args: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source_count_query: String,
    /// Destination query template, rendered against each record.
    pub destination_query: String,
    pub destination_query_n_args: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transformation_script: String,
}

/// Top-level descriptor: databases, tunnels, and migrations, each keyed by
/// machine name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub component: Component,
    pub databases: BTreeMap<String, Database>,
    pub tunnels: BTreeMap<String, Tunnel>,
    pub migrations: BTreeMap<String, Migration>,
}

impl Project {
    pub fn migration(&self, machine_name: &str) -> Option<&Migration> {
        self.migrations.get(machine_name)
    }

    pub fn database(&self, machine_name: &str) -> Option<&Database> {
        self.databases.get(machine_name)
    }

    pub fn tunnel(&self, machine_name: &str) -> Option<&Tunnel> {
        self.tunnels.get(machine_name)
    }
}
