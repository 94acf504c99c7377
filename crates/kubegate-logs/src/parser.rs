use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use kubegate_types::LogLine;

/// Parser for timestamped container log lines
pub struct LogParser;

impl LogParser {
    /// Parse `<RFC3339Nano timestamp> <body>` as produced with `timestamps=true`.
    ///
    /// Returns `None` when the line has no parsable timestamp prefix.
    pub fn parse(raw: &str, pod: &str) -> Option<LogLine> {
        let (timestamp, body) = raw.split_once(' ')?;
        let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);

        Some(LogLine {
            timestamp,
            body: body.to_string(),
            labels: Self::labels(body, pod),
            pod: pod.to_string(),
        })
    }

    /// Labels of a line: the JSON object body plus `pod`, or just `pod`
    fn labels(body: &str, pod: &str) -> Value {
        let mut labels = match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };

        labels
            .entry("pod")
            .or_insert_with(|| Value::String(pod.to_string()));
        Value::Object(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_plain_line() {
        let line = LogParser::parse("2024-01-15T10:30:00.123456789Z GET /healthz 200", "web-1").unwrap();

        assert_eq!(line.body, "GET /healthz 200");
        assert_eq!(line.pod, "web-1");
        assert_eq!(line.labels, json!({"pod": "web-1"}));
        assert_eq!(
            line.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap() + chrono::Duration::nanoseconds(123456789)
        );
    }

    #[test]
    fn test_parse_json_line() {
        let line = LogParser::parse(
            r#"2024-01-15T10:30:00Z {"level":"info","build":"abc123","msg":"started"}"#,
            "web-1",
        )
        .unwrap();

        assert_eq!(
            line.labels,
            json!({"level": "info", "build": "abc123", "msg": "started", "pod": "web-1"})
        );
    }

    #[test]
    fn test_json_array_is_not_labels() {
        let line = LogParser::parse("2024-01-15T10:30:00Z [1,2,3]", "web-1").unwrap();
        assert_eq!(line.labels, json!({"pod": "web-1"}));
    }

    #[test]
    fn test_existing_pod_field_is_kept() {
        let line = LogParser::parse(r#"2024-01-15T10:30:00Z {"pod":"inner"}"#, "web-1").unwrap();
        assert_eq!(line.labels, json!({"pod": "inner"}));
    }

    #[test]
    fn test_unparsable_lines() {
        assert!(LogParser::parse("no timestamp here", "web-1").is_none());
        assert!(LogParser::parse("2024-01-15T10:30:00Z", "web-1").is_none());
        assert!(LogParser::parse("", "web-1").is_none());
    }
}
