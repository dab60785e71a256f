//! Template-driven bulk writes.
//!
//! A [`BatchTemplate`] carries a triple-pattern fragment with `{?var}`
//! placeholders plus the bindings to substitute. Bindings must already be
//! SPARQL-safe (rendered through the sanitizer by the caller); the
//! operator substitutes them verbatim. Chunks are submitted as single
//! `INSERT DATA` updates; a failed chunk falls back to per-item submission
//! with exponential-backoff retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::client::RdfClient;
use crate::error::Result;

/// A pattern with `{?var}` placeholders and the bindings to fill them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTemplate {
    /// e.g. `{?s} <http://example.com/pred> {?o} .`
    pub pattern: String,
    /// Each binding maps placeholder names (with the `?` sigil) to
    /// SPARQL-safe replacement text.
    pub bindings: Vec<BTreeMap<String, String>>,
}

/// Aggregate outcome of one template application.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failed_items: Vec<BTreeMap<String, String>>,
    pub duration_ms: f64,
}

/// Chunked INSERT DATA executor with per-item retry fallback.
pub struct BatchOperator {
    client: Arc<dyn RdfClient>,
    batch_size: usize,
    max_retries: u32,
}

impl BatchOperator {
    pub fn new(client: Arc<dyn RdfClient>) -> Self {
        Self {
            client,
            batch_size: 1000,
            max_retries: 3,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Render and submit the template against `graph_iri`. With `dry_run`
    /// the chunks are rendered but nothing is submitted.
    pub async fn apply_template(
        &self,
        template: &BatchTemplate,
        graph_iri: &str,
        trace_id: &str,
        dry_run: bool,
    ) -> Result<BatchResult> {
        let start = Instant::now();
        let total = template.bindings.len();
        let mut success = 0usize;
        let mut failed = 0usize;
        let mut failed_items = Vec::new();

        for (chunk_index, chunk) in template.bindings.chunks(self.batch_size).enumerate() {
            if dry_run || chunk.is_empty() {
                success += chunk.len();
                continue;
            }
            match self
                .execute_chunk(&template.pattern, chunk, graph_iri, trace_id)
                .await
            {
                Ok(_) => success += chunk.len(),
                Err(e) => {
                    error!(chunk = chunk_index, error = %e, "batch chunk failed, retrying per item");
                    for binding in chunk {
                        if self
                            .retry_single(&template.pattern, binding, graph_iri, trace_id)
                            .await
                        {
                            success += 1;
                        } else {
                            failed += 1;
                            failed_items.push(binding.clone());
                        }
                    }
                }
            }
        }

        Ok(BatchResult {
            total,
            success,
            failed,
            failed_items,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn execute_chunk(
        &self,
        pattern: &str,
        bindings: &[BTreeMap<String, String>],
        graph_iri: &str,
        trace_id: &str,
    ) -> Result<()> {
        let snippets: Vec<String> = bindings
            .iter()
            .map(|binding| render_binding(pattern, binding))
            .collect();
        let update = format!(
            "INSERT DATA {{\n  GRAPH <{graph_iri}> {{\n    {}\n  }}\n}}",
            snippets.join(" ")
        );
        self.client.update(&update, None, Some(trace_id)).await?;
        Ok(())
    }

    /// Per-item fallback with exponential backoff (0.5s, 1s, 2s, …).
    async fn retry_single(
        &self,
        pattern: &str,
        binding: &BTreeMap<String, String>,
        graph_iri: &str,
        trace_id: &str,
    ) -> bool {
        for attempt in 0..self.max_retries {
            match self
                .execute_chunk(pattern, std::slice::from_ref(binding), graph_iri, trace_id)
                .await
            {
                Ok(_) => return true,
                Err(e) => {
                    if attempt + 1 >= self.max_retries {
                        error!(error = %e, "final per-item retry failed");
                        return false;
                    }
                    warn!(attempt, error = %e, "per-item retry failed, backing off");
                    let delay = 0.5 * 2f64.powi(attempt as i32);
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
        false
    }
}

fn render_binding(pattern: &str, binding: &BTreeMap<String, String>) -> String {
    let mut statement = pattern.to_string();
    for (var, value) in binding {
        statement = statement.replace(&format!("{{{var}}}"), value);
    }
    statement
}
