use regex::Regex;

use kubegate_types::{LogLine, TimeRange};

/// Compiled filter for log lines
#[derive(Clone, Debug, Default)]
pub struct LineFilter {
    /// Regex matched against the line body (if any)
    regex: Option<Regex>,

    /// Window the timestamp must fall strictly inside (if any)
    time_range: Option<TimeRange>,
}

impl LineFilter {
    /// Create a new filter from a pattern string; empty matches everything
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        Ok(Self {
            regex,
            time_range: None,
        })
    }

    /// Restrict to a time window
    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    /// Check if a log line passes both the time window and the regex
    pub fn matches(&self, line: &LogLine) -> bool {
        if let Some(range) = &self.time_range {
            if !range.contains(&line.timestamp) {
                return false;
            }
        }

        match &self.regex {
            Some(re) => re.is_match(&line.body),
            None => true,
        }
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none() && self.time_range.is_none()
    }
}
