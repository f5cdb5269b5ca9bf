use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::format::FormatOptions;
use crate::models::SleepSession;

use super::state::{TrackerSnapshot, TrackerState};

/// Tracks tonight's sleep session against the store and publishes derived
/// UI signals through a watch channel.
///
/// At most one session is open at a time: `start_tracking` refuses to run
/// while a session is in progress, and initialization only resumes the
/// latest stored session if it is still open.
#[derive(Clone)]
pub struct SessionTrackerController {
    state: Arc<Mutex<TrackerState>>,
    db: Database,
    options: Arc<FormatOptions>,
    snapshot_tx: Arc<watch::Sender<TrackerSnapshot>>,
    cancel: CancellationToken,
    refresher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionTrackerController {
    pub async fn new(db: Database, options: FormatOptions) -> Result<Self> {
        let latest = db
            .latest_session()
            .await
            .context("failed to load latest sleep session")?;
        let sessions = db
            .all_sessions()
            .await
            .context("failed to load sleep sessions")?;

        let mut state = TrackerState {
            sessions,
            ..TrackerState::default()
        };
        state.adopt_latest(latest);

        let (snapshot_tx, _) = watch::channel(state.snapshot(&options));

        let controller = Self {
            state: Arc::new(Mutex::new(state)),
            db: db.clone(),
            options: Arc::new(options),
            snapshot_tx: Arc::new(snapshot_tx),
            cancel: CancellationToken::new(),
            refresher: Arc::new(Mutex::new(None)),
        };

        controller.spawn_refresher(db.subscribe_sessions()).await;

        Ok(controller)
    }

    /// Current value of the derived signals.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribes to snapshot updates; every command and every store change
    /// publishes a fresh value.
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Opens a new session stamped `started_at == ended_at == now` and adopts
    /// the row the store assigned. Fails without touching the store when a
    /// session is already open.
    pub async fn start_tracking(&self) -> Result<SleepSession> {
        {
            let state = self.state.lock().await;
            if state.current.is_some() {
                bail!("a sleep session is already in progress");
            }
        }

        let now = Utc::now();
        let id = self
            .db
            .insert_session(now, now)
            .await
            .context("failed to insert new sleep session")?;

        // Re-fetch instead of trusting local state, so `current` carries the
        // id storage assigned.
        let latest = self
            .db
            .latest_session()
            .await
            .context("failed to re-fetch latest sleep session")?;

        let mut state = self.state.lock().await;
        state.adopt_latest(latest);
        self.publish(&state);

        info!("Started sleep session {id}");
        state
            .current
            .clone()
            .ok_or_else(|| anyhow!("inserted sleep session {id} did not come back open"))
    }

    /// Stamps the end time on the open session and queues the one-shot
    /// rating navigation event. A stop with no open session is a no-op:
    /// no storage write, no event.
    pub async fn stop_tracking(&self) -> Result<Option<SleepSession>> {
        let current = { self.state.lock().await.current.clone() };
        let Some(mut session) = current else {
            return Ok(None);
        };

        session.ended_at = Utc::now();
        self.db
            .update_session(&session)
            .await
            .context("failed to persist sleep session end time")?;

        let mut state = self.state.lock().await;
        state.current = None;
        state.pending_rating = Some(session.clone());
        self.publish(&state);

        info!(
            "Stopped sleep session {} after {} ms",
            session.id,
            session.duration_ms()
        );
        Ok(Some(session))
    }

    /// Deletes every stored session and queues the one-shot snackbar event.
    pub async fn clear(&self) -> Result<()> {
        self.db
            .clear_sessions()
            .await
            .context("failed to clear sleep sessions")?;

        let mut state = self.state.lock().await;
        state.current = None;
        state.pending_snackbar = true;
        self.publish(&state);

        info!("Cleared all sleep sessions");
        Ok(())
    }

    /// Acknowledges the snackbar event so re-observation cannot re-trigger it.
    pub async fn done_showing_snackbar(&self) {
        let mut state = self.state.lock().await;
        state.pending_snackbar = false;
        self.publish(&state);
    }

    /// Acknowledges the rating navigation event.
    pub async fn done_navigating(&self) {
        let mut state = self.state.lock().await;
        state.pending_rating = None;
        self.publish(&state);
    }

    /// Cancels the refresh task and joins it. No snapshot is published after
    /// this returns.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.refresher.lock().await.take() {
            handle.await.context("refresh task failed to join")?;
        }
        Ok(())
    }

    async fn spawn_refresher(&self, mut feed: watch::Receiver<Vec<SleepSession>>) {
        let mut refresher_guard = self.refresher.lock().await;
        if let Some(handle) = refresher_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let options = self.options.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = feed.changed() => {
                        if changed.is_err() {
                            warn!("session feed closed; stopping refresh task");
                            break;
                        }

                        let sessions = feed.borrow_and_update().clone();
                        let mut guard = state.lock().await;
                        guard.sessions = sessions;
                        let _ = snapshot_tx.send(guard.snapshot(&options));
                    }
                }
            }
        });

        *refresher_guard = Some(handle);
    }

    fn publish(&self, state: &TrackerState) {
        let _ = self.snapshot_tx.send(state.snapshot(&self.options));
    }
}
