//! `KILL [QUERY | CONNECTION] <id>` handling.
//!
//! `KILL QUERY` cancels whatever the target connection is executing and
//! leaves it connected. `KILL CONNECTION` and plain `KILL` additionally close
//! the target's transport and drop it from the registry.

use std::sync::Arc;

use tracing::info;

use crate::error::{GateError, Result};
use super::registry::ConnectionRegistry;
use super::session::SessionProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillTarget {
    Connection(u32),
    Query(u32),
}

impl KillTarget {
    pub fn connection_id(&self) -> u32 {
        match self {
            KillTarget::Connection(id) | KillTarget::Query(id) => *id,
        }
    }
}

/// Parses a kill command.
///
/// Returns `Ok(None)` when the text is not a kill command at all, and
/// `MalformedCommand` when it starts with `KILL` but the rest does not fit the
/// grammar. Keywords are case-insensitive.
pub fn parse_kill(query: &str) -> Result<Option<KillTarget>> {
    let mut tokens = query.trim().trim_end_matches(';').split_whitespace();

    match tokens.next() {
        Some(keyword) if keyword.eq_ignore_ascii_case("kill") => {}
        _ => return Ok(None),
    }

    let malformed = || GateError::MalformedCommand(query.trim().to_string());

    let first = tokens.next().ok_or_else(malformed)?;
    let (scope, id) = if first.eq_ignore_ascii_case("query") {
        (Scope::Query, tokens.next().ok_or_else(malformed)?)
    } else if first.eq_ignore_ascii_case("connection") {
        (Scope::Connection, tokens.next().ok_or_else(malformed)?)
    } else {
        (Scope::Connection, first)
    };

    if tokens.next().is_some() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let id = id.parse::<u32>().map_err(|_| malformed())?;

    Ok(Some(match scope {
        Scope::Query => KillTarget::Query(id),
        Scope::Connection => KillTarget::Connection(id),
    }))
}

enum Scope {
    Query,
    Connection,
}

/// Resolves kill targets through the registry and signals them.
pub struct KillProcessor {
    registry: Arc<ConnectionRegistry>,
    sessions: Arc<dyn SessionProvider>,
}

impl KillProcessor {
    pub fn new(registry: Arc<ConnectionRegistry>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self { registry, sessions }
    }

    /// Returns `Ok(true)` when `query` was a kill command and has been carried out.
    pub fn process(&self, query: &str) -> Result<bool> {
        let Some(target) = parse_kill(query)? else {
            return Ok(false);
        };

        self.kill(target)?;
        Ok(true)
    }

    pub fn kill(&self, target: KillTarget) -> Result<()> {
        let id = target.connection_id();
        self.registry.lookup(id)?;

        info!(connection_id = id, ?target, "Processing kill");

        match target {
            KillTarget::Query(_) => {
                self.sessions.cancel_query(id);
            }
            KillTarget::Connection(_) => {
                self.sessions.invalidate(id);
                self.registry.close(id)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ConnectionHandle, SessionManager};

    #[test]
    fn parses_all_scopes_case_insensitively() {
        assert_eq!(parse_kill("kill 5").unwrap(), Some(KillTarget::Connection(5)));
        assert_eq!(parse_kill("KILL QUERY 5").unwrap(), Some(KillTarget::Query(5)));
        assert_eq!(parse_kill("Kill Connection 5").unwrap(), Some(KillTarget::Connection(5)));
        assert_eq!(parse_kill("  kill   query  12 ;").unwrap(), Some(KillTarget::Query(12)));
    }

    #[test]
    fn non_kill_text_is_passed_on() {
        assert_eq!(parse_kill("SELECT 1").unwrap(), None);
        assert_eq!(parse_kill("killall 5").unwrap(), None);
        assert_eq!(parse_kill("").unwrap(), None);
    }

    #[test]
    fn bad_ids_are_malformed() {
        for text in ["kill abc", "kill", "KILL QUERY", "kill connection x1", "kill 5 6", "kill -1", "kill 99999999999"] {
            assert!(
                matches!(parse_kill(text), Err(GateError::MalformedCommand(_))),
                "{text}"
            );
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Arc<SessionManager>, KillProcessor) {
        let registry = ConnectionRegistry::shared();
        let sessions = Arc::new(SessionManager::new());
        let processor = KillProcessor::new(registry.clone(), sessions.clone());
        (registry, sessions, processor)
    }

    #[test]
    fn kill_query_cancels_but_keeps_connection() {
        let (registry, sessions, processor) = setup();
        let conn = ConnectionHandle::new(3, "root");
        registry.register(conn.clone());
        let ctx = sessions.context_for(&conn).unwrap();

        assert!(processor.process("KILL QUERY 3").unwrap());

        assert!(ctx.is_cancelled());
        assert!(registry.contains(3));
        assert!(!conn.is_closed());
    }

    #[test]
    fn kill_connection_closes_and_unregisters() {
        let (registry, sessions, processor) = setup();
        let conn = ConnectionHandle::new(7, "root");
        registry.register(conn.clone());
        let ctx = sessions.context_for(&conn).unwrap();

        assert!(processor.process("KILL CONNECTION 7").unwrap());

        assert!(ctx.is_cancelled());
        assert!(conn.is_closed());
        assert!(matches!(registry.lookup(7), Err(GateError::ConnectionNotFound(7))));
        assert!(sessions.session_info(7).is_none());
    }

    #[test]
    fn bare_kill_is_connection_scope() {
        let (registry, _, processor) = setup();
        registry.register(ConnectionHandle::new(8, "root"));

        assert!(processor.process("kill 8").unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_target_leaves_registry_untouched() {
        let (registry, _, processor) = setup();
        registry.register(ConnectionHandle::new(1, "root"));

        assert!(matches!(
            processor.process("KILL 42"),
            Err(GateError::ConnectionNotFound(42))
        ));
        assert_eq!(registry.ids(), vec![1]);
    }

    #[test]
    fn ordinary_queries_are_not_handled() {
        let (_, _, processor) = setup();
        assert!(!processor.process("SELECT * FROM t").unwrap());
    }
}
