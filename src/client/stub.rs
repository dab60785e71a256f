//! Scripted [`RdfClient`] double for tests.
//!
//! Responses are queued per operation and every submitted request is
//! recorded, so tests can assert both what was sent and how the caller
//! handles each scripted outcome. When a queue runs dry the double answers
//! with an empty success, which keeps simple tests short.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{
    BindingCell, BindingRow, ConstructResult, HealthStatus, RdfClient, ResponseStats,
    SelectResult, UpdateResult,
};
use crate::error::Result;

/// Which operation a recorded request came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Select,
    Construct,
    Update,
}

/// One request as the double saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub kind: RequestKind,
    pub text: String,
    pub trace_id: Option<String>,
}

/// Scripted test double implementing [`RdfClient`].
#[derive(Debug, Default)]
pub struct ScriptedClient {
    selects: Mutex<VecDeque<Result<SelectResult>>>,
    constructs: Mutex<VecDeque<Result<ConstructResult>>>,
    updates: Mutex<VecDeque<Result<UpdateResult>>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a SELECT response built from rows of `(var, cell)` pairs.
    pub fn push_select_rows(&self, vars: &[&str], rows: Vec<BindingRow>) {
        let result = SelectResult {
            vars: vars.iter().map(|v| v.to_string()).collect(),
            bindings: rows,
            stats: ResponseStats {
                status: 200,
                duration_ms: 1.0,
            },
        };
        self.selects.lock().unwrap().push_back(Ok(result));
    }

    /// Queue a single-var, single-cell-per-row SELECT response.
    pub fn push_select_column(&self, var: &str, values: Vec<BindingCell>) {
        let rows = values
            .into_iter()
            .map(|cell| {
                let mut row = BindingRow::new();
                row.insert(var.to_string(), cell);
                row
            })
            .collect();
        self.push_select_rows(&[var], rows);
    }

    pub fn push_select_error(&self, err: crate::error::AclError) {
        self.selects.lock().unwrap().push_back(Err(err));
    }

    pub fn push_construct(&self, turtle: &str) {
        self.constructs.lock().unwrap().push_back(Ok(ConstructResult {
            turtle: turtle.to_string(),
            stats: ResponseStats {
                status: 200,
                duration_ms: 1.0,
            },
        }));
    }

    pub fn push_update_ok(&self) {
        self.updates.lock().unwrap().push_back(Ok(UpdateResult {
            status: 204,
            duration_ms: 1.0,
        }));
    }

    pub fn push_update_error(&self, err: crate::error::AclError) {
        self.updates.lock().unwrap().push_back(Err(err));
    }

    /// All recorded requests, in submission order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Just the UPDATE statements, in submission order.
    pub fn update_texts(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.kind == RequestKind::Update)
            .map(|r| r.text)
            .collect()
    }

    fn record(&self, kind: RequestKind, text: &str, trace_id: Option<&str>) {
        self.log.lock().unwrap().push(RecordedRequest {
            kind,
            text: text.to_string(),
            trace_id: trace_id.map(str::to_string),
        });
    }
}

#[async_trait]
impl RdfClient for ScriptedClient {
    async fn select(
        &self,
        query: &str,
        _timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<SelectResult> {
        self.record(RequestKind::Select, query, trace_id);
        self.selects
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SelectResult::empty()))
    }

    async fn construct(
        &self,
        query: &str,
        _timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<ConstructResult> {
        self.record(RequestKind::Construct, query, trace_id);
        self.constructs.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(ConstructResult {
                turtle: String::new(),
                stats: ResponseStats {
                    status: 200,
                    duration_ms: 1.0,
                },
            })
        })
    }

    async fn update(
        &self,
        update: &str,
        _timeout: Option<Duration>,
        trace_id: Option<&str>,
    ) -> Result<UpdateResult> {
        self.record(RequestKind::Update, update, trace_id);
        self.updates.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(UpdateResult {
                status: 204,
                duration_ms: 1.0,
            })
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            ok: true,
            backend: "scripted".to_string(),
            dataset: "test".to_string(),
        })
    }
}
