//! Result summaries.

use std::collections::HashMap;
use std::time::Duration;

use crate::bolt::{SuccessMessage, Value};

/// Coarse query classification inferred from the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    /// Index or constraint manipulation
    SchemaWrite,
    /// Creates, merges, sets, deletes, or removes data
    Write,
    /// Reads data
    Read,
    /// Could not be classified
    #[default]
    Unknown,
}

impl QueryType {
    /// Classify a query by keyword. Schema operations are checked first
    /// since they also contain the write keywords.
    pub fn infer(query: &str) -> Self {
        let upper = query.to_uppercase();

        if upper.contains("CREATE INDEX")
            || upper.contains("DROP INDEX")
            || upper.contains("CREATE CONSTRAINT")
            || upper.contains("DROP CONSTRAINT")
        {
            QueryType::SchemaWrite
        } else if upper.contains("CREATE")
            || upper.contains("MERGE")
            || upper.contains("SET")
            || upper.contains("DELETE")
            || upper.contains("REMOVE")
        {
            QueryType::Write
        } else if upper.contains("MATCH") || upper.contains("RETURN") || upper.contains("WITH") {
            QueryType::Read
        } else {
            QueryType::Unknown
        }
    }

    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::SchemaWrite => "SCHEMA_WRITE",
            QueryType::Write => "WRITE",
            QueryType::Read => "READ",
            QueryType::Unknown => "UNKNOWN",
        }
    }
}

/// Database statistics reported on the terminal SUCCESS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub contains_updates: bool,
    pub contains_system_updates: bool,
}

impl Counters {
    /// Parse from the `stats` metadata map (hyphenated server keys).
    pub fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let int = |key: &str| stats.get(key).and_then(|v| v.as_int()).unwrap_or(0);
        let flag = |key: &str| stats.get(key).and_then(|v| v.as_bool()).unwrap_or(false);

        Self {
            nodes_created: int("nodes-created"),
            nodes_deleted: int("nodes-deleted"),
            relationships_created: int("relationships-created"),
            relationships_deleted: int("relationships-deleted"),
            properties_set: int("properties-set"),
            labels_added: int("labels-added"),
            labels_removed: int("labels-removed"),
            indexes_added: int("indexes-added"),
            indexes_removed: int("indexes-removed"),
            constraints_added: int("constraints-added"),
            constraints_removed: int("constraints-removed"),
            contains_updates: flag("contains-updates"),
            contains_system_updates: flag("contains-system-updates"),
        }
    }
}

/// A position inside the query text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub offset: i64,
    pub line: i64,
    pub column: i64,
}

/// A server notification (warning, deprecation, hint).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub position: Option<Position>,
}

impl Notification {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        let text = |key: &str| {
            map.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let position = map.get("position").and_then(|v| v.as_map()).map(|p| {
            let int = |key: &str| p.get(key).and_then(|v| v.as_int()).unwrap_or(0);
            Position {
                offset: int("offset"),
                line: int("line"),
                column: int("column"),
            }
        });

        Some(Self {
            code: text("code"),
            title: text("title"),
            description: text("description"),
            severity: text("severity"),
            position,
        })
    }
}

/// Metadata about an executed query.
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// The query text
    pub query_text: String,
    /// The parameters the query ran with
    pub parameters: HashMap<String, Value>,
    /// Wall-clock execution time, measured by the driver
    pub execution_time: Duration,
    /// Address of the server that answered
    pub server_address: String,
    /// Classification of the query text
    pub query_type: QueryType,
    /// Transactional bookmark from the terminal SUCCESS
    pub bookmark: Option<String>,
    /// Time until the result was available (server-reported, ms)
    pub result_available_after: Option<i64>,
    /// Time until the result was consumed (server-reported, ms)
    pub result_consumed_after: Option<i64>,
    /// Database statistics
    pub counters: Counters,
    /// Server notifications
    pub notifications: Vec<Notification>,
}

impl ResultSummary {
    /// Start a summary for a query about to run.
    pub fn new(query: &str, parameters: HashMap<String, Value>, server_address: &str) -> Self {
        Self {
            query_text: query.to_string(),
            parameters,
            server_address: server_address.to_string(),
            query_type: QueryType::infer(query),
            ..Default::default()
        }
    }

    /// Fold metadata from a RUN SUCCESS into the summary.
    pub fn apply_run_success(&mut self, success: &SuccessMessage) {
        if let Some(t) = success.t_first() {
            self.result_available_after = Some(t);
        }
    }

    /// Fold metadata from the terminal SUCCESS into the summary.
    pub fn apply_final_success(&mut self, success: &SuccessMessage) {
        if let Some(stats) = success.stats() {
            self.counters = Counters::from_stats(stats);
        }
        if let Some(bookmark) = success.bookmark() {
            self.bookmark = Some(bookmark.to_string());
        }
        if let Some(t) = success.t_last() {
            self.result_consumed_after = Some(t);
        }
        if let Some(raw) = success.notifications() {
            self.notifications = raw.iter().filter_map(Notification::from_value).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_inference() {
        assert_eq!(QueryType::infer("MATCH (n) RETURN n"), QueryType::Read);
        assert_eq!(QueryType::infer("RETURN 1 AS n"), QueryType::Read);
        assert_eq!(
            QueryType::infer("CREATE (n:Person {name: 'X'})"),
            QueryType::Write
        );
        assert_eq!(QueryType::infer("MERGE (n:Tag)"), QueryType::Write);
        assert_eq!(
            QueryType::infer("CREATE INDEX idx FOR (n:Person) ON (n.name)"),
            QueryType::SchemaWrite
        );
        assert_eq!(QueryType::infer("SHOW PROCEDURES"), QueryType::Unknown);
    }

    #[test]
    fn test_counters_from_stats() {
        let mut stats = HashMap::new();
        stats.insert("nodes-created".to_string(), Value::Integer(3));
        stats.insert("properties-set".to_string(), Value::Integer(7));
        stats.insert("contains-updates".to_string(), Value::Boolean(true));

        let counters = Counters::from_stats(&stats);
        assert_eq!(counters.nodes_created, 3);
        assert_eq!(counters.properties_set, 7);
        assert_eq!(counters.nodes_deleted, 0);
        assert!(counters.contains_updates);
        assert!(!counters.contains_system_updates);
    }

    #[test]
    fn test_apply_final_success() {
        let mut summary = ResultSummary::new("CREATE (n)", HashMap::new(), "localhost:7687");
        assert_eq!(summary.query_type, QueryType::Write);

        let mut stats = HashMap::new();
        stats.insert("nodes-created".to_string(), Value::Integer(1));

        let mut success = SuccessMessage::new();
        success.add("stats", Value::Map(stats));
        success.add("bookmark", Value::from("FB:bookmark"));
        success.add("t_last", Value::Integer(12));

        summary.apply_final_success(&success);
        assert_eq!(summary.counters.nodes_created, 1);
        assert_eq!(summary.bookmark.as_deref(), Some("FB:bookmark"));
        assert_eq!(summary.result_consumed_after, Some(12));
    }

    #[test]
    fn test_notifications_parsed() {
        let mut position = HashMap::new();
        position.insert("offset".to_string(), Value::Integer(0));
        position.insert("line".to_string(), Value::Integer(1));
        position.insert("column".to_string(), Value::Integer(1));

        let mut notification = HashMap::new();
        notification.insert(
            "code".to_string(),
            Value::from("Neo.ClientNotification.Statement.CartesianProduct"),
        );
        notification.insert("title".to_string(), Value::from("Cartesian product"));
        notification.insert("description".to_string(), Value::from("..."));
        notification.insert("severity".to_string(), Value::from("WARNING"));
        notification.insert("position".to_string(), Value::Map(position));

        let mut success = SuccessMessage::new();
        success.add(
            "notifications",
            Value::List(vec![Value::Map(notification)]),
        );

        let mut summary = ResultSummary::new("MATCH (a), (b) RETURN a, b", HashMap::new(), "h:1");
        summary.apply_final_success(&success);

        assert_eq!(summary.notifications.len(), 1);
        let n = &summary.notifications[0];
        assert!(n.code.contains("CartesianProduct"));
        assert_eq!(n.severity, "WARNING");
        assert_eq!(n.position.as_ref().unwrap().line, 1);
    }

    #[test]
    fn test_apply_run_success() {
        let mut summary = ResultSummary::new("RETURN 1", HashMap::new(), "h:1");
        let mut success = SuccessMessage::new();
        success.add("t_first", Value::Integer(4));
        summary.apply_run_success(&success);
        assert_eq!(summary.result_available_after, Some(4));
    }
}
