//! Merging `meta.k8s.io` Table fragments into one rendered table

use std::collections::HashSet;

use kubegate_types::{NamespacedName, ResourceDescriptor, Table, TableRow};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::quantity;

// ============================================================================
// Wire types
// ============================================================================

/// Server-side table as returned for `Accept: application/json;as=Table`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableResponse {
    pub column_definitions: Vec<ColumnDefinition>,
    pub rows: Vec<TableResponseRow>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub description: String,
    /// Columns with a priority above zero are only shown in wide mode
    pub priority: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TableResponseRow {
    pub cells: Vec<Value>,
    /// `PartialObjectMetadata` of the listed object
    pub object: Option<Value>,
}

impl TableResponseRow {
    fn object_key(&self) -> Result<NamespacedName, GatewayError> {
        let metadata = self
            .object
            .as_ref()
            .and_then(|o| o.get("metadata"))
            .ok_or_else(|| GatewayError::Malformed("table row without object metadata".to_string()))?;

        let field = |name: &str| {
            metadata
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(NamespacedName::new(field("namespace"), field("name")))
    }
}

/// One fetched table plus, when a JSONPath filter is active, the objects it
/// selected in the same scope
#[derive(Clone, Debug, Default)]
pub struct TableFragment {
    pub table: TableResponse,
    pub json_path_matches: Option<HashSet<NamespacedName>>,
}

// ============================================================================
// Merging
// ============================================================================

/// Client-side row selection applied while merging
#[derive(Clone, Debug, Default)]
pub enum RowFilter {
    #[default]
    All,
    /// Keep rows selected by the fragments' JSONPath matches
    JsonPath,
    /// Keep rows whose name matches
    NameRegex(Regex),
}

pub struct TableMerger<'a> {
    resource: &'a ResourceDescriptor,
    wide: bool,
    filter: RowFilter,
}

impl<'a> TableMerger<'a> {
    pub fn new(resource: &'a ResourceDescriptor, wide: bool) -> Self {
        Self {
            resource,
            wide,
            filter: RowFilter::All,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Merge fragments in order.
    ///
    /// Column definitions come from the first fragment that has any. Rows are
    /// deduplicated by `(namespace, name)`, or by name for cluster-scoped
    /// kinds, keeping the first occurrence.
    pub fn merge(&self, fragments: &[TableFragment]) -> Result<Table, GatewayError> {
        let namespaced = self.resource.namespaced;

        let definitions: &[ColumnDefinition] = fragments
            .iter()
            .map(|f| f.table.column_definitions.as_slice())
            .find(|defs| !defs.is_empty())
            .unwrap_or_default();

        let visible: Vec<(usize, &ColumnDefinition)> = definitions
            .iter()
            .enumerate()
            .filter(|(_, column)| self.wide || column.priority == 0)
            .collect();

        let mut columns = Vec::with_capacity(visible.len() + 1);
        if namespaced {
            columns.push("Namespace".to_string());
        }
        columns.extend(visible.iter().map(|(_, column)| self.column_name(&column.name)));

        let json_path_matches: HashSet<&NamespacedName> = fragments
            .iter()
            .filter_map(|f| f.json_path_matches.as_ref())
            .flatten()
            .collect();

        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for row in fragments.iter().flat_map(|f| &f.table.rows) {
            let key = row.object_key()?;

            let keep = match &self.filter {
                RowFilter::All => true,
                RowFilter::JsonPath => json_path_matches.contains(&key),
                RowFilter::NameRegex(regex) => regex.is_match(&key.name),
            };
            if !keep {
                continue;
            }

            let identity = if namespaced {
                key.clone()
            } else {
                NamespacedName::new("", key.name.clone())
            };
            if !seen.insert(identity) {
                continue;
            }

            let mut cells = Vec::with_capacity(columns.len());
            if namespaced {
                cells.push(key.namespace.clone());
            }
            for (index, column) in &visible {
                cells.push(self.render_cell(&column.name, row.cells.get(*index)));
            }

            rows.push(TableRow {
                namespace: namespaced.then_some(key.namespace),
                name: key.name,
                cells,
            });
        }

        Ok(Table {
            name: self.resource.kind.clone(),
            columns,
            rows,
        })
    }

    fn is_metrics(&self) -> bool {
        matches!(
            self.resource.id.as_str(),
            "podmetrics.metrics.k8s.io" | "nodemetrics.metrics.k8s.io"
        )
    }

    fn column_name(&self, name: &str) -> String {
        if self.is_metrics() {
            match name {
                "cpu" => return "CPU".to_string(),
                "memory" => return "Memory".to_string(),
                _ => {}
            }
        }
        name.to_string()
    }

    fn render_cell(&self, column: &str, value: Option<&Value>) -> String {
        let text = match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        if self.is_metrics() {
            let formatted = match column {
                "cpu" => quantity::format_cpu(&text),
                "memory" => quantity::format_memory(&text),
                _ => None,
            };
            if let Some(formatted) = formatted {
                return formatted;
            }
        }

        text
    }
}
