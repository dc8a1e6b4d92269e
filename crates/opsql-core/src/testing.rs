//! Scripted in-memory port for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::PortError;
use crate::port::{Database, SqlPort, Transaction};
use crate::value::Row;

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<Row>),
    Affected(u64),
    Error(String),
    /// Never completes; used to exercise cancellation mid-call.
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxEvent {
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct State {
    script: HashMap<String, Response>,
    statements: Vec<String>,
    events: Vec<TxEvent>,
    fail_begin: bool,
    fail_commit: bool,
}

/// Answers each statement from a script and records what ran.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedPort {
    state: Arc<Mutex<State>>,
}

impl ScriptedPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(self, sql: &str, response: Response) -> Self {
        self.state
            .lock()
            .unwrap()
            .script
            .insert(sql.to_string(), response);
        self
    }

    pub(crate) fn with_rows(self, sql: &str, rows: Vec<Row>) -> Self {
        self.script(sql, Response::Rows(rows))
    }

    pub(crate) fn with_affected(self, sql: &str, affected: u64) -> Self {
        self.script(sql, Response::Affected(affected))
    }

    pub(crate) fn with_error(self, sql: &str, message: &str) -> Self {
        self.script(sql, Response::Error(message.to_string()))
    }

    pub(crate) fn with_hang(self, sql: &str) -> Self {
        self.script(sql, Response::Hang)
    }

    pub(crate) fn failing_begin(self) -> Self {
        self.state.lock().unwrap().fail_begin = true;
        self
    }

    pub(crate) fn failing_commit(self) -> Self {
        self.state.lock().unwrap().fail_commit = true;
        self
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub(crate) fn events(&self) -> Vec<TxEvent> {
        self.state.lock().unwrap().events.clone()
    }

    async fn respond(&self, sql: &str) -> Response {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.statements.push(sql.to_string());
            state
                .script
                .get(sql)
                .cloned()
                .unwrap_or_else(|| Response::Error(format!("unscripted statement: {}", sql)))
        };
        if let Response::Hang = response {
            std::future::pending::<()>().await;
        }
        response
    }
}

#[async_trait]
impl SqlPort for ScriptedPort {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        match self.respond(sql).await {
            Response::Rows(rows) => Ok(rows),
            Response::Error(e) => Err(PortError::Query(e)),
            other => Err(PortError::Query(format!("scripted {:?} for a query", other))),
        }
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        match self.respond(sql).await {
            Response::Affected(n) => Ok(n),
            Response::Error(e) => Err(PortError::Exec(e)),
            other => Err(PortError::Exec(format!("scripted {:?} for a statement", other))),
        }
    }
}

#[async_trait]
impl Database for ScriptedPort {
    async fn begin(&self) -> Result<Box<dyn Transaction>, PortError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_begin {
            return Err(PortError::Begin("connection refused".into()));
        }
        state.events.push(TxEvent::Begin);
        Ok(Box::new(ScriptedTransaction {
            port: self.clone(),
        }))
    }

    fn driver_name(&self) -> &'static str {
        "scripted"
    }

    async fn close(&self) {}
}

struct ScriptedTransaction {
    port: ScriptedPort,
}

#[async_trait]
impl SqlPort for ScriptedTransaction {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        self.port.query_rows(sql).await
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        self.port.exec(sql).await
    }
}

#[async_trait]
impl Transaction for ScriptedTransaction {
    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        let mut state = self.port.state.lock().unwrap();
        if state.fail_commit {
            return Err(PortError::Commit("connection reset".into()));
        }
        state.events.push(TxEvent::Commit);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        self.port.state.lock().unwrap().events.push(TxEvent::Rollback);
        Ok(())
    }
}
