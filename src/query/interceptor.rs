//! Canned answers for queries that must never reach the engine.
//!
//! Client drivers send bootstrap probes and session-variable assignments
//! during connection setup that the engine has no notion of. They are
//! answered here from an ordered list of (matcher, response) rules.

use std::sync::Arc;

use tracing::debug;

use crate::engine::{Column, ColumnKind, Row, Schema, Value};
use super::batcher::ResultBatch;

/// Decides whether a query belongs to an intercepted category.
pub trait QueryMatcher: Send + Sync {
    fn matches(&self, query: &str) -> bool;
}

/// Byte-for-byte comparison.
pub struct ExactMatcher {
    text: String,
}

impl ExactMatcher {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl QueryMatcher for ExactMatcher {
    fn matches(&self, query: &str) -> bool {
        query == self.text
    }
}

/// Compares queries after [`normalize`], so comments, spacing and case don't matter.
pub struct NormalizedMatcher {
    normalized: String,
}

impl NormalizedMatcher {
    pub fn new(text: &str) -> Self {
        Self {
            normalized: normalize(text),
        }
    }
}

impl QueryMatcher for NormalizedMatcher {
    fn matches(&self, query: &str) -> bool {
        normalize(query) == self.normalized
    }
}

/// Canonical form of a query used for matching: leading block comments
/// stripped, whitespace collapsed, ASCII-lowercased, no spaces around `=` or
/// `,`, no trailing semicolon.
pub fn normalize(query: &str) -> String {
    let mut rest = query.trim_start();
    while let Some(stripped) = rest.strip_prefix("/*") {
        match stripped.find("*/") {
            Some(end) => rest = stripped[end + 2..].trim_start(),
            None => break,
        }
    }

    let collapsed = rest
        .trim_end()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();

    collapsed
        .replace(" = ", "=")
        .replace(" =", "=")
        .replace("= ", "=")
        .replace(" , ", ",")
        .replace(" ,", ",")
        .replace(", ", ",")
}

/// Response sent instead of executing an intercepted query.
#[derive(Debug, Clone)]
pub enum CannedResponse {
    /// A single-row result set.
    Row { schema: Arc<Schema>, row: Row },
    /// An empty acknowledgement with zero affected rows.
    Ack,
}

impl CannedResponse {
    pub fn to_batch(&self) -> ResultBatch {
        match self {
            CannedResponse::Row { schema, row } => {
                let mut batch = ResultBatch::new(schema.clone());
                batch.push(row.clone());
                batch
            }
            CannedResponse::Ack => ResultBatch::ack(0),
        }
    }
}

struct InterceptRule {
    name: &'static str,
    matcher: Box<dyn QueryMatcher>,
    response: CannedResponse,
}

pub struct QueryInterceptor {
    rules: Vec<InterceptRule>,
}

impl QueryInterceptor {
    /// An interceptor with no rules; every query passes through.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The rules needed by common MySQL client drivers.
    pub fn with_defaults() -> Self {
        let mut interceptor = Self::empty();
        interceptor.add_rule(
            "connector-j bootstrap",
            Box::new(NormalizedMatcher::new(CONNECTOR_BOOTSTRAP_PROBE)),
            bootstrap_response(),
        );
        interceptor.add_rule(
            "set character_set_results",
            Box::new(NormalizedMatcher::new("SET character_set_results = NULL")),
            CannedResponse::Ack,
        );
        interceptor.add_rule(
            "set autocommit",
            Box::new(NormalizedMatcher::new("SET autocommit=1")),
            CannedResponse::Ack,
        );
        interceptor.add_rule(
            "version comment",
            Box::new(NormalizedMatcher::new("select @@version_comment limit 1")),
            CannedResponse::Row {
                schema: Arc::new(Schema::new(vec![Column::new("@@version_comment", ColumnKind::Text)])),
                row: Row::new(vec![Value::from("querygate")]),
            },
        );
        interceptor
    }

    /// Appends a rule. Rules are tried in insertion order.
    pub fn add_rule(
        &mut self,
        name: &'static str,
        matcher: Box<dyn QueryMatcher>,
        response: CannedResponse,
    ) {
        self.rules.push(InterceptRule {
            name,
            matcher,
            response,
        });
    }

    pub fn intercept(&self, query: &str) -> Option<ResultBatch> {
        let rule = self.rules.iter().find(|rule| rule.matcher.matches(query))?;
        debug!("Query intercepted by rule '{}'", rule.name);
        Some(rule.response.to_batch())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for QueryInterceptor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Session probe issued by MySQL Connector/J right after authentication.
pub const CONNECTOR_BOOTSTRAP_PROBE: &str = "/* mysql-connector-java-8.0.11 (Revision: 6d4eaa273bc181b4cf1c8ad0821a2227f116fedf) */SELECT  @@session.auto_increment_increment AS auto_increment_increment, @@character_set_client AS character_set_client, @@character_set_connection AS character_set_connection, @@character_set_results AS character_set_results, @@character_set_server AS character_set_server, @@collation_server AS collation_server, @@init_connect AS init_connect, @@interactive_timeout AS interactive_timeout, @@license AS license, @@lower_case_table_names AS lower_case_table_names, @@max_allowed_packet AS max_allowed_packet, @@net_write_timeout AS net_write_timeout, @@query_cache_size AS query_cache_size, @@query_cache_type AS query_cache_type, @@sql_mode AS sql_mode, @@system_time_zone AS system_time_zone, @@time_zone AS time_zone, @@tx_isolation AS transaction_isolation, @@wait_timeout AS wait_timeout";

const BOOTSTRAP_SQL_MODE: &str = "ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_AUTO_CREATE_USER,NO_ENGINE_SUBSTITUTION";

fn bootstrap_response() -> CannedResponse {
    use ColumnKind::{Int32, Text};

    let columns: [(&str, ColumnKind, Value); 19] = [
        ("auto_increment_increment", Int32, Value::Int(1)),
        ("character_set_client", Text, Value::from("utf8")),
        ("character_set_connection", Text, Value::from("utf8")),
        ("character_set_results", Text, Value::from("utf8")),
        ("character_set_server", Text, Value::from("latin1")),
        ("collation_server", Text, Value::from("latin1_swedish_ci")),
        ("init_connect", Text, Value::from("")),
        ("interactive_timeout", Int32, Value::Int(28800)),
        ("license", Text, Value::from("GPL")),
        ("lower_case_table_names", Int32, Value::Int(0)),
        ("max_allowed_packet", Int32, Value::Int(419430400)),
        ("net_write_timeout", Int32, Value::Int(60)),
        ("query_cache_size", Int32, Value::Int(1048576)),
        ("query_cache_type", Text, Value::from("OFF")),
        ("sql_mode", Text, Value::from(BOOTSTRAP_SQL_MODE)),
        ("system_time_zone", Text, Value::from("UTC")),
        ("time_zone", Text, Value::from("SYSTEM")),
        ("transaction_isolation", Text, Value::from("REPEATABLE-READ")),
        ("wait_timeout", Int32, Value::Int(28800)),
    ];

    let (schema, values): (Vec<Column>, Vec<Value>) = columns
        .into_iter()
        .map(|(name, kind, value)| (Column::new(name, kind), value))
        .unzip();

    CannedResponse::Row {
        schema: Arc::new(Schema::new(schema)),
        row: Row::new(values),
    }
}
