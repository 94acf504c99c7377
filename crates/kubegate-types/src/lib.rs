//! Shared types for kubegate
//!
//! This crate contains data structures used across multiple kubegate crates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// One API resource kind discovered on the cluster and how to address it.
///
/// The `id` is `kind` or `kind.group` in lowercase. It deliberately leaves the
/// version out, so references stored by callers survive API version bumps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub id: String,
    pub kind: String,
    pub api_version: String,
    pub plural_name: String,
    pub path: String,
    pub namespaced: bool,
}

impl ResourceDescriptor {
    /// Build a descriptor from one discovery entry of a group/version list
    pub fn from_discovery(group_version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        let prefix = if group_version == "v1" { "/api" } else { "/apis" };

        let id = match group_version.split_once('/') {
            Some((group, _)) => format!("{}.{}", kind, group),
            None => kind.to_string(),
        };

        Self {
            id: id.to_lowercase(),
            kind: kind.to_string(),
            api_version: group_version.to_string(),
            plural_name: plural.to_string(),
            path: format!("{}/{}", prefix, group_version),
            namespaced,
        }
    }

    /// REST path of the collection, scoped to `namespace` for namespaced kinds
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        match namespace.filter(|ns| self.namespaced && !ns.is_empty()) {
            Some(ns) => format!("{}/namespaces/{}/{}", self.path, ns, self.plural_name),
            None => format!("{}/{}", self.path, self.plural_name),
        }
    }

    /// REST path of a single object
    pub fn object_path(&self, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

/// Namespace and name of an object, used as a filter membership key
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Pods backing one workload plus the containers found in them
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PodGroup {
    pub pods: Vec<String>,
    pub containers: Vec<String>,
}

// ============================================================================
// Identity
// ============================================================================

/// The identity a request is impersonated as.
///
/// An empty user together with no groups means no impersonation at all: the
/// request runs with the gateway's own cluster credential.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(user: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user: user.into(),
            groups,
        }
    }

    /// Check if nothing is impersonated
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.groups.is_empty()
    }
}

// ============================================================================
// Table Types
// ============================================================================

/// A merged, rendered `kubectl get`-style table
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Kind of the listed resource
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl Table {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of the named column, in row order
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.cells.get(index).map(String::as_str).unwrap_or_default())
                .collect(),
        )
    }
}

/// One object in a [`Table`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    /// Rendered cells, aligned to [`Table::columns`]
    pub cells: Vec<String>,
}

/// How the results of a table query are narrowed down
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FilterSpec {
    #[default]
    None,
    /// Server-side query parameter; every value is fetched separately
    Parameter { name: String, values: Vec<String> },
    /// JSONPath evaluated client-side against the full object list
    JsonPath(String),
    /// Regular expression matched client-side against the object name
    Regex(String),
}

impl FilterSpec {
    /// Interpret the `parameterName`/`parameterValue` pair of a query.
    ///
    /// `jsonPath` and `regex` are client-side filters; any other name is sent
    /// to the API server, with `a||b` expanded into one request per value.
    pub fn from_parameter(name: &str, value: &str) -> Self {
        match name {
            "" => Self::None,
            "jsonPath" => Self::JsonPath(value.to_string()),
            "regex" => Self::Regex(value.to_string()),
            _ => Self::Parameter {
                name: name.to_string(),
                values: value.split("||").map(str::to_string).collect(),
            },
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Time window of a batch log query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The window ending now
    pub fn last(duration: Duration) -> Self {
        let to = Utc::now();
        Self {
            from: to - duration,
            to,
        }
    }

    /// Check if a timestamp lies strictly inside the window
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp > self.from && *timestamp < self.to
    }
}

/// A single log line of one pod
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Structured labels; always carries at least the `pod` field
    pub labels: serde_json::Value,
    pub pod: String,
}

// ============================================================================
// Queries
// ============================================================================

/// A query as sent by the visualization frontend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queryType")]
pub enum Query {
    #[serde(rename = "kubernetes-resourceids")]
    ResourceIds,
    #[serde(rename = "kubernetes-namespaces")]
    Namespaces,
    #[serde(rename = "kubernetes-resources")]
    Resources(ResourcesQuery),
    #[serde(rename = "kubernetes-containers")]
    Containers(ContainersQuery),
    #[serde(rename = "kubernetes-logs")]
    Logs(LogsQuery),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourcesQuery {
    pub resource: String,
    pub namespace: String,
    pub parameter_name: String,
    pub parameter_value: String,
    pub wide: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainersQuery {
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogsQuery {
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub container: String,
    pub filter: String,
    pub tail: i64,
    pub previous: bool,
    pub time_range: Option<TimeRange>,
}

/// Result of a dispatched [`Query`]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    ResourceIds(Vec<ResourceDescriptor>),
    Names(Vec<String>),
    Table(Table),
    Logs(Vec<LogLine>),
}
