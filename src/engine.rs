//! Job lifecycle: submit a batch for a client, run it, tear it down

use crate::error::CheckerError;
use crate::proxy::models::truncate_chars;
use crate::proxy::{checker_for, BatchCoordinator, Checker, CheckerConfig, ProxyAddress, ProxyParser};
use crate::report::{self, FinalReport};
use crate::session::{
    ActiveSession, CancelFlag, ClientId, ProgressNotifier, ProgressSnapshot, Session, SessionStore,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum candidate lines accepted in one batch
pub const DEFAULT_MAX_LINES: usize = 50_000;

/// Session-level failure messages are cut to this many characters
const FAILURE_MESSAGE_LIMIT: usize = 150;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// A registered session together with the checker that will run it.
///
/// Dropping a job that was never run releases its session.
pub struct Job {
    session: Arc<Session>,
    checker: Arc<dyn Checker>,
    guard: SessionGuard,
}

impl Job {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    Completed(FinalReport),
    Cancelled(ProgressSnapshot),
    Failed(String),
}

/// Removes the session from the store however the job ends
struct SessionGuard {
    store: Arc<SessionStore>,
    client: ClientId,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.store.remove(&self.client, self.id);
    }
}

/// Cancels the batch if the caller stops waiting for it
struct CancelOnDrop(Option<CancelFlag>);

impl CancelOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.cancel();
        }
    }
}

pub struct Engine {
    store: Arc<SessionStore>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<SessionStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Normalize the input and register a session for the client.
    ///
    /// Fails if the client already has an active session, if the input
    /// exceeds the line cap, or if no line yields a valid address.
    pub fn submit(
        &self,
        client: ClientId,
        config: CheckerConfig,
        content: &str,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Result<Job, CheckerError> {
        if self.store.contains(&client) {
            return Err(CheckerError::SessionActive(client));
        }
        config.validate()?;

        let candidates = ProxyParser::count_candidates(content);
        if candidates > self.config.max_lines {
            return Err(CheckerError::TooManyProxies {
                found: candidates,
                max: self.config.max_lines,
            });
        }

        let checker = checker_for(config);
        let addresses = normalize(checker.as_ref(), content);
        if addresses.is_empty() {
            return Err(CheckerError::NoValidProxies);
        }

        tracing::info!(
            "client {}: {} unique proxies from {} lines ({} mode)",
            client,
            addresses.len(),
            candidates,
            checker.mode()
        );

        let progress_every = checker.config().progress_every;
        let session = Session::new(client, checker.mode(), addresses, progress_every, notifier);
        let session = self.store.insert(session)?;
        let guard = SessionGuard {
            store: Arc::clone(&self.store),
            client: session.client().clone(),
            id: session.id(),
        };

        Ok(Job {
            session,
            checker,
            guard,
        })
    }

    /// Run a submitted job to the end.
    ///
    /// The session stays registered until its batch task ends, even if this
    /// future is dropped first; in that case the batch is cancelled at the
    /// next chunk boundary.
    pub async fn run(&self, job: Job) -> JobOutcome {
        let Job {
            session,
            checker,
            guard,
        } = job;

        tracing::info!(
            "session {} started for client {} ({} proxies)",
            session.id(),
            session.client(),
            session.addresses().len()
        );

        let coordinator = BatchCoordinator::new(checker);
        let batch_session = Arc::clone(&session);
        let batch = tokio::spawn(async move {
            let _guard = guard;
            coordinator.run_batch(&batch_session).await
        });

        let cancel_on_drop = CancelOnDrop(Some(session.cancel_flag()));
        let joined = batch.await;
        cancel_on_drop.disarm();

        if let Err(e) = joined {
            let message = truncate_chars(&e.to_string(), FAILURE_MESSAGE_LIMIT);
            tracing::error!("session {} failed: {}", session.id(), message);
            return JobOutcome::Failed(message);
        }

        if session.is_cancelled() {
            let snapshot = session.tracker().snapshot().await;
            tracing::info!("session {} cancelled at {}", session.id(), snapshot);
            return JobOutcome::Cancelled(snapshot);
        }

        let report = report::finalize(&session).await;
        tracing::info!(
            "session {} finished: {} checked, {} found in {:.1}s",
            session.id(),
            report.summary.checked,
            report.summary.found,
            report.summary.elapsed_secs
        );
        JobOutcome::Completed(report)
    }

    /// Flag the client's active session as cancelled
    pub fn cancel(&self, client: &ClientId) -> bool {
        self.store.cancel(client)
    }

    /// Cancel every active session, returns how many were flagged
    pub fn cancel_all(&self) -> usize {
        self.store.cancel_all()
    }

    pub async fn active(&self) -> Vec<ActiveSession> {
        self.store.active().await
    }
}

/// Parse every line with the checker, keeping the first of each address
fn normalize(checker: &dyn Checker, content: &str) -> Vec<ProxyAddress> {
    let mut seen = HashSet::new();
    content
        .lines()
        .filter_map(|line| checker.parse(line))
        .filter(|address| seen.insert(address.clone()))
        .collect()
}
