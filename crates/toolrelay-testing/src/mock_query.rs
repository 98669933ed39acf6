//! # Mock Query Collaborators
//!
//! Scripted [`QueryGenerator`] and [`QueryExecutor`] for exercising the
//! self-healing loop without a reasoning engine or a data store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use toolrelay_agent::{
    AgentError, AgentResult, QueryExecutor, QueryGenerator, QueryOutput, QueryRequest,
};

use crate::lock;

/// A correction request seen by [`MockQueryGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionCall {
    pub failed_query: String,
    pub error: String,
}

/// Serves queued queries for `generate` and `correct` alike.
#[derive(Debug, Clone, Default)]
pub struct MockQueryGenerator {
    queries: Arc<Mutex<VecDeque<Result<String, String>>>>,
    generate_count: Arc<Mutex<usize>>,
    corrections: Arc<Mutex<Vec<CorrectionCall>>>,
}

impl MockQueryGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_query(self, query: impl Into<String>) -> Self {
        lock(&self.queries).push_back(Ok(query.into()));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        lock(&self.queries).push_back(Err(message.into()));
        self
    }

    pub fn generate_count(&self) -> usize {
        *lock(&self.generate_count)
    }

    pub fn correction_count(&self) -> usize {
        lock(&self.corrections).len()
    }

    pub fn corrections(&self) -> Vec<CorrectionCall> {
        lock(&self.corrections).clone()
    }

    fn next(&self) -> AgentResult<String> {
        match lock(&self.queries).pop_front() {
            Some(Ok(query)) => Ok(query),
            Some(Err(message)) => Err(AgentError::EngineError(message)),
            None => Err(AgentError::EngineError(
                "mock generator has no queries left".to_string(),
            )),
        }
    }
}

#[async_trait]
impl QueryGenerator for MockQueryGenerator {
    async fn generate(&self, _request: &QueryRequest) -> AgentResult<String> {
        *lock(&self.generate_count) += 1;
        self.next()
    }

    async fn correct(
        &self,
        _request: &QueryRequest,
        failed_query: &str,
        error: &str,
    ) -> AgentResult<String> {
        lock(&self.corrections).push(CorrectionCall {
            failed_query: failed_query.to_string(),
            error: error.to_string(),
        });
        self.next()
    }
}

/// Executor answering each query from a script, in order.
#[derive(Debug, Clone, Default)]
pub struct MockQueryExecutor {
    outcomes: Arc<Mutex<VecDeque<Result<Vec<Value>, String>>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_rows(self, rows: Vec<Value>) -> Self {
        lock(&self.outcomes).push_back(Ok(rows));
        self
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        lock(&self.outcomes).push_back(Err(message.into()));
        self
    }

    pub fn executed_queries(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    pub fn execution_count(&self) -> usize {
        lock(&self.executed).len()
    }
}

#[async_trait]
impl QueryExecutor for MockQueryExecutor {
    async fn execute(&self, query: &str) -> Result<QueryOutput, String> {
        lock(&self.executed).push(query.to_string());
        match lock(&self.outcomes).pop_front() {
            Some(Ok(rows)) => Ok(QueryOutput::new(rows)),
            Some(Err(message)) => Err(message),
            None => Err("mock executor has no outcomes left".to_string()),
        }
    }
}
