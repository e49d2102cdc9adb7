use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GateError, Result};
use super::registry::ConnectionHandle;

/// Execution context handed to the engine for a single query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub connection_id: u32,
    pub query_id: Uuid,
    pub user: String,
    pub database: Option<String>,
    token: CancellationToken,
}

impl QueryContext {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Produces per-query contexts for connections and owns their cancellation.
pub trait SessionProvider: Send + Sync {
    /// Returns a fresh context for the next query on `conn`, creating the
    /// session on first use.
    fn context_for(&self, conn: &ConnectionHandle) -> Result<QueryContext>;

    /// Marks the query behind `ctx` as finished.
    fn finish(&self, ctx: &QueryContext);

    /// Cancels the in-flight query of a connection, keeping the session.
    /// Returns whether a query was running.
    fn cancel_query(&self, connection_id: u32) -> bool;

    /// Drops the session of a connection and cancels anything it runs.
    fn invalidate(&self, connection_id: u32);

    /// Records the current database selected by the client.
    fn set_database(&self, connection_id: u32, database: &str);
}

#[derive(Debug)]
struct Session {
    user: String,
    database: Option<String>,
    root: CancellationToken,
    active: Option<(Uuid, CancellationToken)>,
    queries: u64,
    created_at: Instant,
}

/// Snapshot of a session, for introspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user: String,
    pub database: Option<String>,
    pub queries: u64,
    pub running: bool,
}

/// Default in-memory [`SessionProvider`].
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: DashMap<u32, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_info(&self, connection_id: u32) -> Option<SessionInfo> {
        self.sessions.get(&connection_id).map(|s| SessionInfo {
            user: s.user.clone(),
            database: s.database.clone(),
            queries: s.queries,
            running: s.active.is_some(),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionProvider for SessionManager {
    fn context_for(&self, conn: &ConnectionHandle) -> Result<QueryContext> {
        if conn.is_closed() {
            return Err(GateError::ConnectionClosed);
        }

        let mut session = self.sessions.entry(conn.id).or_insert_with(|| {
            debug!(connection_id = conn.id, "Session created");
            Session {
                user: conn.user.clone(),
                database: conn.database.clone(),
                root: CancellationToken::new(),
                active: None,
                queries: 0,
                created_at: Instant::now(),
            }
        });

        let query_id = Uuid::new_v4();
        let token = session.root.child_token();
        session.active = Some((query_id, token.clone()));
        session.queries += 1;

        Ok(QueryContext {
            connection_id: conn.id,
            query_id,
            user: session.user.clone(),
            database: session.database.clone(),
            token,
        })
    }

    fn finish(&self, ctx: &QueryContext) {
        if let Some(mut session) = self.sessions.get_mut(&ctx.connection_id) {
            if matches!(&session.active, Some((id, _)) if *id == ctx.query_id) {
                session.active = None;
            }
        }
    }

    fn cancel_query(&self, connection_id: u32) -> bool {
        let active = self
            .sessions
            .get_mut(&connection_id)
            .and_then(|mut session| session.active.take());

        match active {
            Some((query_id, token)) => {
                info!(connection_id, %query_id, "Cancelling running query");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn invalidate(&self, connection_id: u32) {
        if let Some((_, session)) = self.sessions.remove(&connection_id) {
            session.root.cancel();
            debug!(
                connection_id,
                queries = session.queries,
                age_ms = session.created_at.elapsed().as_millis() as u64,
                "Session invalidated"
            );
        }
    }

    fn set_database(&self, connection_id: u32, database: &str) {
        if let Some(mut session) = self.sessions.get_mut(&connection_id) {
            session.database = Some(database.to_string());
        }
    }
}
