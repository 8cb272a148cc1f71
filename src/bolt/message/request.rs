//! Bolt protocol request messages.
//!
//! Request messages are sent from the client to the server. Each converts
//! into a PackStream structure for framing; the client never needs to parse
//! one back.

use std::collections::HashMap;

use super::tag;
use crate::bolt::packstream::{Structure, Value};

/// Database flavor negotiated from the connection URL.
///
/// The flavor travels as explicit configuration from the URL resolver down
/// to the message builders that need it, never through a metadata map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    /// Neo4j server (default database "neo4j")
    Neo4j,
    /// Memgraph server (no default database)
    Memgraph,
}

impl Adapter {
    /// Scheme name as it appears in connection URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Adapter::Neo4j => "neo4j",
            Adapter::Memgraph => "memgraph",
        }
    }

    /// Parse from a URL scheme adapter segment.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "neo4j" => Some(Adapter::Neo4j),
            "memgraph" => Some(Adapter::Memgraph),
            _ => None,
        }
    }

    /// Default database for this flavor ("" means none).
    pub fn default_database(&self) -> &'static str {
        match self {
            Adapter::Neo4j => "neo4j",
            Adapter::Memgraph => "",
        }
    }
}

/// All Bolt request messages.
#[derive(Debug, Clone)]
pub enum BoltRequest {
    /// HELLO - introduce the client
    Hello(HelloMessage),
    /// LOGON - authenticate (Bolt 5.1+)
    Logon(LogonMessage),
    /// GOODBYE - close connection gracefully
    Goodbye,
    /// RESET - reset connection state
    Reset,
    /// RUN - execute a query
    Run(RunMessage),
    /// PULL - request records
    Pull(PullMessage),
    /// DISCARD - drop remaining records
    Discard(DiscardMessage),
    /// BEGIN - start transaction (message type only; not orchestrated)
    Begin(BeginMessage),
    /// COMMIT - commit transaction (message type only)
    Commit,
    /// ROLLBACK - rollback transaction (message type only)
    Rollback,
    /// ROUTE - request routing table (message type only)
    Route(RouteMessage),
}

impl BoltRequest {
    /// Get the message tag.
    pub fn tag(&self) -> u8 {
        match self {
            BoltRequest::Hello(_) => tag::HELLO,
            BoltRequest::Logon(_) => tag::LOGON,
            BoltRequest::Goodbye => tag::GOODBYE,
            BoltRequest::Reset => tag::RESET,
            BoltRequest::Run(_) => tag::RUN,
            BoltRequest::Pull(_) => tag::PULL,
            BoltRequest::Discard(_) => tag::DISCARD,
            BoltRequest::Begin(_) => tag::BEGIN,
            BoltRequest::Commit => tag::COMMIT,
            BoltRequest::Rollback => tag::ROLLBACK,
            BoltRequest::Route(_) => tag::ROUTE,
        }
    }

    /// Get message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltRequest::Hello(_) => "HELLO",
            BoltRequest::Logon(_) => "LOGON",
            BoltRequest::Goodbye => "GOODBYE",
            BoltRequest::Reset => "RESET",
            BoltRequest::Run(_) => "RUN",
            BoltRequest::Pull(_) => "PULL",
            BoltRequest::Discard(_) => "DISCARD",
            BoltRequest::Begin(_) => "BEGIN",
            BoltRequest::Commit => "COMMIT",
            BoltRequest::Rollback => "ROLLBACK",
            BoltRequest::Route(_) => "ROUTE",
        }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        match self {
            BoltRequest::Hello(msg) => msg.to_structure(),
            BoltRequest::Logon(msg) => msg.to_structure(),
            BoltRequest::Goodbye => Structure::new(tag::GOODBYE, vec![]),
            BoltRequest::Reset => Structure::new(tag::RESET, vec![]),
            BoltRequest::Run(msg) => msg.to_structure(),
            BoltRequest::Pull(msg) => msg.to_structure(),
            BoltRequest::Discard(msg) => msg.to_structure(),
            BoltRequest::Begin(msg) => msg.to_structure(),
            BoltRequest::Commit => Structure::new(tag::COMMIT, vec![]),
            BoltRequest::Rollback => Structure::new(tag::ROLLBACK, vec![]),
            BoltRequest::Route(msg) => msg.to_structure(),
        }
    }
}

/// HELLO message - introduce the client to the server.
///
/// Bolt 5.x separates introduction from authentication: HELLO carries the
/// user agent and client details, the following LOGON carries credentials.
#[derive(Debug, Clone)]
pub struct HelloMessage {
    /// User agent string
    pub user_agent: String,
    /// Additional metadata entries
    pub extra: HashMap<String, Value>,
}

impl HelloMessage {
    /// Create a HELLO message with the standard client metadata.
    pub fn new(user_agent: &str) -> Self {
        let mut bolt_agent = HashMap::new();
        bolt_agent.insert("product".to_string(), Value::from(user_agent));
        bolt_agent.insert(
            "platform".to_string(),
            Value::from(format!(
                "{}-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            )),
        );
        bolt_agent.insert("language".to_string(), Value::from("rust"));
        bolt_agent.insert("language_details".to_string(), Value::from("edition 2021"));

        let mut extra = HashMap::new();
        extra.insert(
            "notifications_minimum_severity".to_string(),
            Value::from("WARNING"),
        );
        extra.insert("bolt_agent".to_string(), Value::Map(bolt_agent));

        Self {
            user_agent: user_agent.to_string(),
            extra,
        }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let mut metadata = self.extra.clone();
        metadata.insert("user_agent".to_string(), Value::from(self.user_agent.as_str()));
        Structure::new(tag::HELLO, vec![Value::Map(metadata)])
    }
}

/// LOGON message - authenticate with basic credentials (Bolt 5.1+).
#[derive(Debug, Clone)]
pub struct LogonMessage {
    /// Username
    pub principal: String,
    /// Password
    pub credentials: String,
}

impl LogonMessage {
    /// Create a basic-scheme LOGON message.
    pub fn basic(principal: &str, credentials: &str) -> Self {
        Self {
            principal: principal.to_string(),
            credentials: credentials.to_string(),
        }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let mut auth = HashMap::new();
        auth.insert("scheme".to_string(), Value::from("basic"));
        auth.insert("principal".to_string(), Value::from(self.principal.as_str()));
        auth.insert(
            "credentials".to_string(),
            Value::from(self.credentials.as_str()),
        );
        Structure::new(tag::LOGON, vec![Value::Map(auth)])
    }
}

/// RUN message - submit a query with parameters and metadata.
#[derive(Debug, Clone)]
pub struct RunMessage {
    /// Cypher query string
    pub query: String,
    /// Query parameters
    pub parameters: HashMap<String, Value>,
    /// Extra metadata
    pub metadata: HashMap<String, Value>,
}

impl RunMessage {
    /// Create a new RUN message.
    ///
    /// A string `mode` metadata value longer than one character is truncated
    /// to its first character ("write" becomes "w").
    pub fn new(
        query: &str,
        parameters: HashMap<String, Value>,
        mut metadata: HashMap<String, Value>,
    ) -> Self {
        let truncated = match metadata.get("mode") {
            Some(Value::String(mode)) if mode.len() > 1 => {
                mode.chars().next().map(String::from)
            }
            _ => None,
        };
        if let Some(first) = truncated {
            metadata.insert("mode".to_string(), Value::String(first));
        }

        Self {
            query: query.to_string(),
            parameters,
            metadata,
        }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(
            tag::RUN,
            vec![
                Value::from(self.query.as_str()),
                Value::Map(self.parameters.clone()),
                Value::Map(self.metadata.clone()),
            ],
        )
    }
}

/// PULL message - request up to `n` records (-1 for all).
#[derive(Debug, Clone)]
pub struct PullMessage {
    /// Number of records to pull (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results (-1 for the last query)
    pub qid: i64,
}

impl PullMessage {
    /// Create a PULL for all remaining records.
    pub fn all() -> Self {
        Self { n: -1, qid: -1 }
    }

    /// Create a PULL with a specific batch size.
    pub fn with_n(n: i64) -> Self {
        Self { n, qid: -1 }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), Value::Integer(self.n));
        extra.insert("qid".to_string(), Value::Integer(self.qid));
        Structure::new(tag::PULL, vec![Value::Map(extra)])
    }
}

/// DISCARD message - ask the server to drop remaining records.
#[derive(Debug, Clone)]
pub struct DiscardMessage {
    /// Number of records to discard (-1 for all)
    pub n: i64,
    /// Query ID for multi-query results (-1 for the last query)
    pub qid: i64,
}

impl DiscardMessage {
    /// Create a DISCARD for all remaining records.
    pub fn all() -> Self {
        Self { n: -1, qid: -1 }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), Value::Integer(self.n));
        extra.insert("qid".to_string(), Value::Integer(self.qid));
        Structure::new(tag::DISCARD, vec![Value::Map(extra)])
    }
}

/// BEGIN message - start an explicit transaction.
///
/// The message type exists for completeness; the driver does not orchestrate
/// multi-statement transactions.
#[derive(Debug, Clone)]
pub struct BeginMessage {
    /// Transaction metadata
    pub metadata: HashMap<String, Value>,
}

impl BeginMessage {
    /// Create a BEGIN message with adapter-aware defaults.
    ///
    /// The default mode is "write". For Memgraph the `db` key is removed;
    /// for Neo4j with no `db` set, `db: "neo4j"` is injected.
    pub fn new(adapter: Adapter, mut metadata: HashMap<String, Value>) -> Self {
        metadata
            .entry("mode".to_string())
            .or_insert_with(|| Value::from("write"));

        match adapter {
            Adapter::Memgraph => {
                metadata.remove("db");
            }
            Adapter::Neo4j => {
                metadata
                    .entry("db".to_string())
                    .or_insert_with(|| Value::from("neo4j"));
            }
        }

        Self { metadata }
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        Structure::new(tag::BEGIN, vec![Value::Map(self.metadata.clone())])
    }
}

/// ROUTE message - request the routing table (message type only).
#[derive(Debug, Clone, Default)]
pub struct RouteMessage {
    /// Routing context
    pub routing: HashMap<String, Value>,
    /// Bookmarks to wait for
    pub bookmarks: Vec<String>,
    /// Database name
    pub database: Option<String>,
}

impl RouteMessage {
    /// Create an empty ROUTE message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert to PackStream structure.
    pub fn to_structure(&self) -> Structure {
        let bookmarks: Vec<Value> = self
            .bookmarks
            .iter()
            .map(|s| Value::from(s.as_str()))
            .collect();
        let db = self
            .database
            .as_deref()
            .map(Value::from)
            .unwrap_or(Value::Null);

        Structure::new(
            tag::ROUTE,
            vec![Value::Map(self.routing.clone()), Value::List(bookmarks), db],
        )
    }
}
