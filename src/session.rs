//! Session state for one in-flight batch job
//!
//! A [`Session`] is shared by every probe task of its job. Its counters and
//! results live behind a single mutex in [`SessionTracker`]; the
//! cancellation flag is a separate atomic so it can be read without the lock.

use crate::error::CheckerError;
use crate::proxy::{CheckRecord, Mode, ProxyAddress, ResultRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identifies the client that owns a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Read-only view of a session's progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub checked: usize,
    pub total: usize,
    pub elapsed_secs: f64,
    pub qualifying: usize,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.checked as f64 / self.total as f64 * 100.0
        }
    }

    /// Checked proxies per second
    pub fn rate(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.checked as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    pub fn eta_secs(&self) -> f64 {
        let rate = self.rate();
        if rate > 0.0 {
            self.total.saturating_sub(self.checked) as f64 / rate
        } else {
            0.0
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%) | {:.0}s elapsed | {:.1}/s | ETA {:.0}s | found {}",
            self.checked,
            self.total,
            self.percent(),
            self.elapsed_secs,
            self.rate(),
            self.eta_secs(),
            self.qualifying
        )
    }
}

/// Receives periodic progress for a client. Delivery is best effort.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, client: &ClientId, snapshot: ProgressSnapshot) -> anyhow::Result<()>;
}

/// Notifier that drops every update
pub struct NoopNotifier;

#[async_trait]
impl ProgressNotifier for NoopNotifier {
    async fn notify(&self, _client: &ClientId, _snapshot: ProgressSnapshot) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Cooperative cancellation flag, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    checked: usize,
    results: Vec<ResultRecord>,
}

/// Lock-protected counters and results of one session
pub struct SessionTracker {
    client: ClientId,
    mode: Mode,
    total: usize,
    notify_every: usize,
    started: Instant,
    cancel: CancelFlag,
    notifier: Arc<dyn ProgressNotifier>,
    state: Mutex<TrackerState>,
}

impl SessionTracker {
    pub fn new(
        client: ClientId,
        mode: Mode,
        total: usize,
        notify_every: usize,
        cancel: CancelFlag,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        Self {
            client,
            mode,
            total,
            notify_every: notify_every.max(1),
            started: Instant::now(),
            cancel,
            notifier,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Count one finished probe and keep it if it qualifies.
    ///
    /// Every `notify_every`-th call sends a progress notification after the
    /// lock is released; notification errors are logged, never returned.
    pub async fn record_outcome(&self, record: CheckRecord) {
        let due = {
            let mut state = self.state.lock().await;
            state.checked += 1;

            if let Some(result) = self.qualifying_result(record) {
                tracing::debug!(
                    "{}: {} | {}ms | score {}",
                    self.mode.result_label(),
                    result.address.clean(),
                    result.latency_ms,
                    result.score()
                );
                state.results.push(result);
            }

            (state.checked % self.notify_every == 0)
                .then(|| self.snapshot_of(&state))
        };

        if let Some(snapshot) = due {
            self.notify(snapshot).await;
        }
    }

    fn qualifying_result(&self, record: CheckRecord) -> Option<ResultRecord> {
        let CheckRecord { outcome, quality } = record;
        if !outcome.succeeded {
            return None;
        }
        if self.mode == Mode::Residential && !quality.as_ref().is_some_and(|q| q.premium) {
            return None;
        }

        Some(ResultRecord {
            address: outcome.address,
            latency_ms: outcome.latency_ms,
            observed_ip: outcome.observed_ip.unwrap_or_default(),
            quality,
        })
    }

    async fn notify(&self, snapshot: ProgressSnapshot) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.notifier.notify(&self.client, snapshot).await {
            tracing::error!("progress update for {} failed: {:#}", self.client, e);
        }
    }

    fn snapshot_of(&self, state: &TrackerState) -> ProgressSnapshot {
        ProgressSnapshot {
            checked: state.checked,
            total: self.total,
            elapsed_secs: self.elapsed().as_secs_f64(),
            qualifying: state.results.len(),
        }
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().await;
        self.snapshot_of(&state)
    }

    /// Copy of the qualifying results recorded so far
    pub async fn results(&self) -> Vec<ResultRecord> {
        self.state.lock().await.results.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// One batch job owned by one client
pub struct Session {
    id: Uuid,
    client: ClientId,
    mode: Mode,
    addresses: Vec<ProxyAddress>,
    started_at: DateTime<Local>,
    cancel: CancelFlag,
    tracker: SessionTracker,
}

impl Session {
    pub fn new(
        client: ClientId,
        mode: Mode,
        addresses: Vec<ProxyAddress>,
        notify_every: usize,
        notifier: Arc<dyn ProgressNotifier>,
    ) -> Self {
        let cancel = CancelFlag::new();
        let tracker = SessionTracker::new(
            client.clone(),
            mode,
            addresses.len(),
            notify_every,
            cancel.clone(),
            notifier,
        );

        Self {
            id: Uuid::new_v4(),
            client,
            mode,
            addresses,
            started_at: Local::now(),
            cancel,
            tracker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn addresses(&self) -> &[ProxyAddress] {
        &self.addresses
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Summary line for listing active sessions
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub client: ClientId,
    pub mode: Mode,
    pub progress: ProgressSnapshot,
}

/// Registry of active sessions, at most one per client
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<ClientId, Arc<Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session, rejecting it if the client already has one
    pub fn insert(&self, session: Session) -> Result<Arc<Session>, CheckerError> {
        match self.sessions.entry(session.client().clone()) {
            Entry::Occupied(entry) => Err(CheckerError::SessionActive(entry.key().clone())),
            Entry::Vacant(entry) => {
                let session = Arc::new(session);
                entry.insert(Arc::clone(&session));
                Ok(session)
            }
        }
    }

    pub fn get(&self, client: &ClientId) -> Option<Arc<Session>> {
        self.sessions.get(client).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.sessions.contains_key(client)
    }

    /// Remove the client's session, but only if it is still `id`
    pub fn remove(&self, client: &ClientId, id: Uuid) -> bool {
        self.sessions
            .remove_if(client, |_, session| session.id() == id)
            .is_some()
    }

    /// Flag the client's session as cancelled
    pub fn cancel(&self, client: &ClientId) -> bool {
        match self.sessions.get(client) {
            Some(session) => {
                session.cancel();
                true
            }
            None => false,
        }
    }

    /// Flag every active session as cancelled, returns how many
    pub fn cancel_all(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().cancel())
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Progress of every active session
    pub async fn active(&self) -> Vec<ActiveSession> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut active = Vec::with_capacity(sessions.len());
        for session in sessions {
            active.push(ActiveSession {
                client: session.client().clone(),
                mode: session.mode(),
                progress: session.tracker().snapshot().await,
            });
        }
        active
    }
}
