use std::collections::HashSet;

use kubegate_types::NamespacedName;
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::error::GatewayError;

/// A kubectl-style JSONPath (`{.items[?(@.spec.replicas==1)]}`) selecting objects
#[derive(Debug, Clone)]
pub struct JsonPathFilter {
    path: JsonPath,
}

impl JsonPathFilter {
    pub fn parse(expression: &str) -> Result<Self, GatewayError> {
        let path = JsonPath::parse(&normalize(expression)).map_err(|e| GatewayError::InvalidJsonPath {
            path: expression.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { path })
    }

    /// Namespace and name of every object the path selects in `list`.
    ///
    /// Selected nodes without `metadata.name` are ignored.
    pub fn matches(&self, list: &Value) -> HashSet<NamespacedName> {
        self.path
            .query(list)
            .all()
            .into_iter()
            .filter_map(|node| {
                let metadata = node.get("metadata")?;
                let name = metadata.get("name")?.as_str()?;
                let namespace = metadata
                    .get("namespace")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(NamespacedName::new(namespace, name))
            })
            .collect()
    }
}

/// Strip the kubectl template braces and root the path at `$`
fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim();

    if inner.starts_with('$') {
        inner.to_string()
    } else if inner.starts_with('.') || inner.starts_with('[') {
        format!("${}", inner)
    } else {
        format!("$.{}", inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployments() -> Value {
        json!({
            "kind": "DeploymentList",
            "items": [
                {"metadata": {"namespace": "default", "name": "echoserver", "labels": {"app": "echoserver"}}, "spec": {"replicas": 1}},
                {"metadata": {"namespace": "default", "name": "web", "labels": {"app": "web"}}, "spec": {"replicas": 3}},
                {"metadata": {"namespace": "prod", "name": "echoserver", "labels": {"app": "echoserver"}}, "spec": {"replicas": 2}},
            ]
        })
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("{.items[*]}"), "$.items[*]");
        assert_eq!(normalize("$.items"), "$.items");
        assert_eq!(normalize("items[0]"), "$.items[0]");
    }

    #[test]
    fn test_filter_by_label() {
        let filter = JsonPathFilter::parse(r#"{.items[?(@.metadata.labels.app=="echoserver")]}"#).unwrap();
        let matches = filter.matches(&deployments());

        assert_eq!(matches.len(), 2);
        assert!(matches.contains(&NamespacedName::new("default", "echoserver")));
        assert!(matches.contains(&NamespacedName::new("prod", "echoserver")));
    }

    #[test]
    fn test_filter_by_number() {
        let filter = JsonPathFilter::parse("{.items[?(@.spec.replicas>1)]}").unwrap();
        let matches = filter.matches(&deployments());

        assert_eq!(matches.len(), 2);
        assert!(matches.contains(&NamespacedName::new("default", "web")));
    }

    #[test]
    fn test_non_object_nodes_are_ignored() {
        let filter = JsonPathFilter::parse("{.items[*].metadata.name}").unwrap();
        assert!(filter.matches(&deployments()).is_empty());
    }

    #[test]
    fn test_invalid_path() {
        let err = JsonPathFilter::parse("{.items[?(@.spec.replicas==]}").unwrap_err();
        assert!(matches!(err, GatewayError::InvalidJsonPath { .. }));
    }
}
