mod batcher;
mod interceptor;
mod kill;
mod registry;
mod session;

pub use batcher::{stream_rows, BatchStats, ResultBatch, ResultSink};
pub use interceptor::{
    normalize, CannedResponse, ExactMatcher, NormalizedMatcher, QueryInterceptor, QueryMatcher,
    CONNECTOR_BOOTSTRAP_PROBE,
};
pub use kill::{parse_kill, KillProcessor, KillTarget};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use session::{QueryContext, SessionInfo, SessionManager, SessionProvider};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DEFAULT_ROWS_BATCH;
use crate::engine::QueryEngine;
use crate::error::Result;

/// Protocol-independent query command handler.
///
/// One instance is shared by every connection. Per command it answers
/// intercepted queries from canned results, executes kill commands, and
/// otherwise runs the query on the engine and streams the rows to the
/// connection's sink in batches.
pub struct Handler {
    engine: Arc<dyn QueryEngine>,
    sessions: Arc<dyn SessionProvider>,
    registry: Arc<ConnectionRegistry>,
    interceptor: QueryInterceptor,
    killer: KillProcessor,
    rows_batch: usize,
}

impl Handler {
    pub fn new(engine: Arc<dyn QueryEngine>, sessions: Arc<dyn SessionProvider>) -> Self {
        let registry = ConnectionRegistry::shared();
        Self {
            engine,
            killer: KillProcessor::new(registry.clone(), sessions.clone()),
            sessions,
            registry,
            interceptor: QueryInterceptor::with_defaults(),
            rows_batch: DEFAULT_ROWS_BATCH,
        }
    }

    pub fn with_batch_size(mut self, rows_batch: usize) -> Self {
        self.rows_batch = rows_batch.max(1);
        self
    }

    pub fn with_interceptor(mut self, interceptor: QueryInterceptor) -> Self {
        self.interceptor = interceptor;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<dyn SessionProvider> {
        &self.sessions
    }

    pub fn batch_size(&self) -> usize {
        self.rows_batch
    }

    /// Reports that a new connection has been established.
    pub fn new_connection(&self, conn: &ConnectionHandle) {
        if !self.registry.register(conn.clone()) {
            warn!(connection_id = conn.id, "Connection id already registered");
        }
        info!(connection_id = conn.id, user = %conn.user, "NewConnection");
    }

    /// Reports that a connection has been closed.
    pub fn connection_closed(&self, connection_id: u32) {
        self.sessions.invalidate(connection_id);
        self.registry.unregister(connection_id);
        info!(connection_id, "ConnectionClosed");
    }

    /// Carries out a kill that arrived as a protocol command rather than SQL text.
    pub fn kill(&self, target: KillTarget) -> Result<()> {
        self.killer.kill(target)
    }

    /// Executes one query command, pushing its results to `sink`.
    pub async fn com_query(
        &self,
        conn: &ConnectionHandle,
        query: &str,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        debug!(connection_id = conn.id, "Query: {}", query);

        if let Some(batch) = self.interceptor.intercept(query) {
            return sink.deliver(batch).await;
        }

        if self.killer.process(query)? {
            return Ok(());
        }

        let ctx = self.sessions.context_for(conn)?;
        let result = self.execute(&ctx, query, sink).await;
        self.sessions.finish(&ctx);

        let stats = result?;
        debug!(
            connection_id = conn.id,
            query_id = %ctx.query_id,
            batches = stats.batches,
            rows = stats.rows,
            "Query finished"
        );
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &QueryContext,
        query: &str,
        sink: &mut dyn ResultSink,
    ) -> Result<BatchStats> {
        let (schema, mut rows) = self.engine.query(ctx, query).await?;
        stream_rows(schema, rows.as_mut(), sink, self.rows_batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::engine::{Column, ColumnKind, Row, RowStream, Schema, Value, VecRowStream};
    use crate::error::GateError;

    /// Engine that returns `rows` integer rows for any query and counts calls.
    struct CountingEngine {
        rows: usize,
        calls: AtomicUsize,
    }

    impl CountingEngine {
        fn new(rows: usize) -> Arc<Self> {
            Arc::new(Self {
                rows,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl QueryEngine for CountingEngine {
        async fn query(
            &self,
            _ctx: &QueryContext,
            sql: &str,
        ) -> Result<(Arc<Schema>, Box<dyn RowStream>)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if sql.contains("broken") {
                return Err(GateError::EngineExecution("table broken is missing".to_string()));
            }
            let schema = Arc::new(Schema::new(vec![Column::new("n", ColumnKind::Int64)]));
            let rows = (0..self.rows).map(|i| Row::new(vec![Value::Int(i as i64)])).collect();
            Ok((schema, Box::new(VecRowStream::new(rows))))
        }
    }

    #[derive(Default)]
    struct Collect(Vec<ResultBatch>);

    #[async_trait]
    impl ResultSink for Collect {
        async fn deliver(&mut self, batch: ResultBatch) -> Result<()> {
            self.0.push(batch);
            Ok(())
        }
    }

    fn handler(engine: Arc<CountingEngine>) -> (Handler, Arc<SessionManager>) {
        let sessions = Arc::new(SessionManager::new());
        (Handler::new(engine, sessions.clone()), sessions)
    }

    fn connect(handler: &Handler, id: u32) -> ConnectionHandle {
        let conn = ConnectionHandle::new(id, "root");
        handler.new_connection(&conn);
        conn
    }

    #[tokio::test]
    async fn streams_rows_in_batches_of_one_hundred() {
        let engine = CountingEngine::new(250);
        let (handler, _) = handler(engine.clone());
        let conn = connect(&handler, 1);

        let mut sink = Collect::default();
        handler.com_query(&conn, "SELECT n FROM t", &mut sink).await.unwrap();

        let sizes: Vec<usize> = sink.0.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn empty_result_delivers_one_empty_batch() {
        let engine = CountingEngine::new(0);
        let (handler, _) = handler(engine.clone());
        let conn = connect(&handler, 1);

        let mut sink = Collect::default();
        handler.com_query(&conn, "SELECT n FROM t", &mut sink).await.unwrap();

        assert_eq!(sink.0.len(), 1);
        assert!(sink.0[0].is_empty());
    }

    #[tokio::test]
    async fn bootstrap_probe_never_reaches_engine() {
        let engine = CountingEngine::new(5);
        let (handler, sessions) = handler(engine.clone());
        let conn = connect(&handler, 1);

        let mut sink = Collect::default();
        handler
            .com_query(&conn, CONNECTOR_BOOTSTRAP_PROBE, &mut sink)
            .await
            .unwrap();

        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].schema().len(), 19);
        assert!(sessions.session_info(1).is_none());
    }

    #[tokio::test]
    async fn kill_connection_removes_target() {
        let engine = CountingEngine::new(5);
        let (handler, _) = handler(engine.clone());
        let killer = connect(&handler, 1);
        let victim = connect(&handler, 7);

        let mut sink = Collect::default();
        handler.com_query(&killer, "KILL CONNECTION 7", &mut sink).await.unwrap();

        assert!(sink.0.is_empty());
        assert!(victim.is_closed());
        assert!(matches!(
            handler.registry().lookup(7),
            Err(GateError::ConnectionNotFound(7))
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn kill_errors_surface_to_caller() {
        let (handler, _) = handler(CountingEngine::new(1));
        let conn = connect(&handler, 1);
        let mut sink = Collect::default();

        let missing = handler.com_query(&conn, "kill 99", &mut sink).await;
        assert!(matches!(missing, Err(GateError::ConnectionNotFound(99))));

        let malformed = handler.com_query(&conn, "kill abc", &mut sink).await;
        assert!(matches!(malformed, Err(GateError::MalformedCommand(_))));
        assert_eq!(handler.registry().len(), 1);
    }

    #[tokio::test]
    async fn engine_errors_pass_through_and_release_the_query() {
        let (handler, sessions) = handler(CountingEngine::new(1));
        let conn = connect(&handler, 1);
        let mut sink = Collect::default();

        let result = handler.com_query(&conn, "SELECT * FROM broken", &mut sink).await;

        assert!(matches!(result, Err(GateError::EngineExecution(_))));
        assert!(sink.0.is_empty());
        assert!(!sessions.session_info(1).unwrap().running);
    }

    #[tokio::test]
    async fn closed_connection_invalidates_session() {
        let (handler, sessions) = handler(CountingEngine::new(1));
        let conn = connect(&handler, 1);
        handler.com_query(&conn, "SELECT 1", &mut Collect::default()).await.unwrap();
        assert!(sessions.session_info(1).is_some());

        handler.connection_closed(1);

        assert!(sessions.session_info(1).is_none());
        assert!(handler.registry().is_empty());
    }

    #[tokio::test]
    async fn batch_size_is_configurable() {
        let (handler, _) = handler(CountingEngine::new(10));
        let handler = handler.with_batch_size(4);
        let conn = connect(&handler, 1);

        let mut sink = Collect::default();
        handler.com_query(&conn, "SELECT n FROM t", &mut sink).await.unwrap();

        let sizes: Vec<usize> = sink.0.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
