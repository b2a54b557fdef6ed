//! Chunked, bounded-concurrency execution of one session's batch

use crate::proxy::checker::Checker;
use crate::proxy::models::CheckRecord;
use crate::session::Session;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Drives a session's address list through a [`Checker`]
pub struct BatchCoordinator {
    checker: Arc<dyn Checker>,
}

impl BatchCoordinator {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    pub fn checker(&self) -> &Arc<dyn Checker> {
        &self.checker
    }

    /// Probe every address of the session, chunk by chunk.
    ///
    /// Returns once all chunks are done or cancellation is observed at a
    /// chunk boundary. Tasks of the current chunk always run to completion.
    pub async fn run_batch(&self, session: &Session) {
        let config = self.checker.config();
        let chunks: Vec<_> = session.addresses().chunks(config.chunk_size.max(1)).collect();
        let total_chunks = chunks.len();

        for (index, chunk) in chunks.into_iter().enumerate() {
            if session.is_cancelled() {
                tracing::info!("session {} cancelled before chunk {}/{}", session.id(), index + 1, total_chunks);
                break;
            }

            tracing::info!("chunk {}/{} ({} proxies)", index + 1, total_chunks, chunk.len());

            let pool = match self.checker.open_pool() {
                Ok(pool) => Arc::new(pool),
                Err(e) => {
                    tracing::error!("chunk {}/{} skipped: {}", index + 1, total_chunks, e);
                    continue;
                }
            };

            let mut completions = stream::iter(chunk.iter().cloned())
                .map(|address| {
                    let checker = Arc::clone(&self.checker);
                    let pool = Arc::clone(&pool);
                    tokio::spawn(async move { checker.probe_one(&pool, address).await })
                })
                .buffer_unordered(config.concurrency.max(1));

            while let Some(joined) = completions.next().await {
                match joined {
                    Ok(record) => self.record(session, record).await,
                    Err(e) => tracing::error!("probe task failed: {}", e),
                }
            }

            if index + 1 < total_chunks && !config.chunk_pause.is_zero() {
                tokio::time::sleep(config.chunk_pause).await;
            }
        }
    }

    async fn record(&self, session: &Session, record: CheckRecord) {
        if !record.outcome.succeeded {
            tracing::debug!("{} | {}", record.outcome.address.clean(), record.status());
        }
        session.tracker().record_outcome(record).await;
    }
}
