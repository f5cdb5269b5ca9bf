//! SQLite-backed session store.
//!
//! All connection access happens on a dedicated worker thread; async callers
//! submit closures over the connection and await the reply on a oneshot
//! channel. Every mutating call re-reads the full session list on the worker
//! and pushes it through a watch channel, so subscribers observe the store
//! reactively without polling.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::{oneshot, watch};

mod migrations;

use migrations::run_migrations;

use crate::models::{SleepSession, QUALITY_MAX, QUALITY_MIN};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("timestamp {millis} ms is out of range"))
}

fn row_to_session(row: &Row) -> Result<SleepSession> {
    Ok(SleepSession {
        id: row.get("id")?,
        started_at: millis_to_datetime(row.get("started_at_ms")?)?,
        ended_at: millis_to_datetime(row.get("ended_at_ms")?)?,
        quality: row.get("quality")?,
    })
}

fn query_all_sessions(conn: &Connection) -> Result<Vec<SleepSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, started_at_ms, ended_at_ms, quality
         FROM sleep_sessions
         ORDER BY id DESC",
    )?;

    let mut rows = stmt.query([])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }

    Ok(sessions)
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    sessions_tx: Arc<watch::Sender<Vec<SleepSession>>>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (sessions_tx, _) = watch::channel(Vec::new());
        let sessions_tx = Arc::new(sessions_tx);
        let feed = sessions_tx.clone();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("sleeptrack-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result = run_migrations(&mut conn)
                    .context("failed to run database migrations")
                    .and_then(|()| {
                        // Seed the feed so early subscribers see the stored
                        // sessions without waiting for the first write.
                        let sessions = query_all_sessions(&conn)?;
                        let _ = feed.send(sessions);
                        Ok(())
                    });
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            sessions_tx,
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Reactive view of the full session list, newest first. The receiver is
    /// updated after every mutating call on any handle to this store.
    pub fn subscribe_sessions(&self) -> watch::Receiver<Vec<SleepSession>> {
        self.sessions_tx.subscribe()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    /// Like `execute`, but re-queries the session list after the task and
    /// publishes it to subscribers. All mutating operations go through here.
    async fn mutate<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let feed = self.sessions_tx.clone();
        self.execute(move |conn| {
            let value = task(conn)?;
            let sessions = query_all_sessions(conn)?;
            let _ = feed.send(sessions);
            Ok(value)
        })
        .await
    }

    /// Inserts a new session row and returns the id storage assigned to it.
    pub async fn insert_session(
        &self,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<i64> {
        self.mutate(move |conn| {
            conn.execute(
                "INSERT INTO sleep_sessions (started_at_ms, ended_at_ms, quality)
                 VALUES (?1, ?2, NULL)",
                params![started_at.timestamp_millis(), ended_at.timestamp_millis()],
            )
            .with_context(|| "failed to insert sleep session")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn update_session(&self, session: &SleepSession) -> Result<()> {
        let record = session.clone();
        self.mutate(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE sleep_sessions
                     SET started_at_ms = ?1,
                         ended_at_ms = ?2,
                         quality = ?3
                     WHERE id = ?4",
                    params![
                        record.started_at.timestamp_millis(),
                        record.ended_at.timestamp_millis(),
                        record.quality,
                        record.id,
                    ],
                )
                .with_context(|| "failed to update sleep session")?;

            if rows_affected == 0 {
                bail!("sleep session {} not found", record.id);
            }

            Ok(())
        })
        .await
    }

    /// Entry point for the rating flow; the tracker itself never touches
    /// quality.
    pub async fn set_quality(&self, session_id: i64, quality: i32) -> Result<()> {
        if !(QUALITY_MIN..=QUALITY_MAX).contains(&quality) {
            bail!("quality {quality} is outside {QUALITY_MIN}..={QUALITY_MAX}");
        }

        self.mutate(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE sleep_sessions SET quality = ?1 WHERE id = ?2",
                    params![quality, session_id],
                )
                .with_context(|| "failed to set sleep quality")?;

            if rows_affected == 0 {
                bail!("sleep session {session_id} not found");
            }

            Ok(())
        })
        .await
    }

    pub async fn latest_session(&self) -> Result<Option<SleepSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at_ms, ended_at_ms, quality
                 FROM sleep_sessions
                 ORDER BY id DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }

    pub async fn all_sessions(&self) -> Result<Vec<SleepSession>> {
        self.execute(|conn| query_all_sessions(conn)).await
    }

    pub async fn clear_sessions(&self) -> Result<()> {
        self.mutate(|conn| {
            conn.execute("DELETE FROM sleep_sessions", [])
                .with_context(|| "failed to clear sleep sessions")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::tempdir;

    use super::*;

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("sleeptrack.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let (_dir, db) = scratch_db();
        let t0 = Utc::now();

        let first = db.insert_session(t0, t0).await.unwrap();
        let second = db.insert_session(t0, t0).await.unwrap();
        assert!(second > first);

        let latest = db.latest_session().await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert!(latest.is_open());
        assert_eq!(latest.quality, None);
    }

    #[tokio::test]
    async fn update_closes_a_session() {
        let (_dir, db) = scratch_db();
        let t0 = Utc::now();
        let id = db.insert_session(t0, t0).await.unwrap();

        let mut session = db.latest_session().await.unwrap().unwrap();
        session.ended_at = session.started_at + Duration::hours(7);
        db.update_session(&session).await.unwrap();

        let reloaded = db.latest_session().await.unwrap().unwrap();
        assert_eq!(reloaded.id, id);
        assert!(!reloaded.is_open());
        assert_eq!(reloaded.duration_ms(), 7 * 60 * 60 * 1000);
    }

    #[tokio::test]
    async fn update_missing_session_fails() {
        let (_dir, db) = scratch_db();
        let t0 = Utc::now();
        let session = SleepSession {
            id: 42,
            started_at: t0,
            ended_at: t0,
            quality: None,
        };

        let err = db.update_session(&session).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn quality_round_trips_and_is_validated() {
        let (_dir, db) = scratch_db();
        let t0 = Utc::now();
        let id = db.insert_session(t0, t0).await.unwrap();

        db.set_quality(id, 4).await.unwrap();
        let session = db.latest_session().await.unwrap().unwrap();
        assert_eq!(session.quality, Some(4));
        assert!(session.is_open());

        assert!(db.set_quality(id, 6).await.is_err());
        assert!(db.set_quality(id, -1).await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let (_dir, db) = scratch_db();
        let t0 = Utc::now();
        db.insert_session(t0, t0).await.unwrap();
        db.insert_session(t0, t0).await.unwrap();

        db.clear_sessions().await.unwrap();

        assert!(db.all_sessions().await.unwrap().is_empty());
        assert!(db.latest_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_writes() {
        let (_dir, db) = scratch_db();
        let mut feed = db.subscribe_sessions();
        assert!(feed.borrow_and_update().is_empty());

        let t0 = Utc::now();
        db.insert_session(t0, t0).await.unwrap();
        feed.changed().await.unwrap();
        assert_eq!(feed.borrow_and_update().len(), 1);

        db.clear_sessions().await.unwrap();
        feed.changed().await.unwrap();
        assert!(feed.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn sessions_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sleeptrack.sqlite3");
        let t0 = Utc::now();

        {
            let db = Database::new(path.clone()).unwrap();
            db.insert_session(t0, t0).await.unwrap();
        }

        let db = Database::new(path).unwrap();
        let sessions = db.all_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_at.timestamp_millis(), t0.timestamp_millis());
    }
}
