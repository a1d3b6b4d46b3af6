use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use crate::{log_error, log_warn, store::KeyValueStore};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Command {
    Run(Job),
    Stop,
}

/// Owns the worker thread; stops and joins it when the last handle drops.
struct Worker {
    commands: mpsc::Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if self.commands.send(Command::Stop).is_err() {
            log_error!("storyreel-db already gone at shutdown");
        }
        if let Err(panic) = handle.join() {
            log_error!("storyreel-db panicked: {panic:?}");
        }
    }
}

/// Opens the file, switches to WAL and makes sure `kv_store` exists.
fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log_warn!("WAL mode unavailable, using default journal: {err}");
    }
    migrations::ensure_schema(&mut conn)?;
    Ok(conn)
}

fn serve(mut conn: Connection, commands: mpsc::Receiver<Command>) {
    for command in commands {
        match command {
            Command::Run(job) => job(&mut conn),
            Command::Stop => break,
        }
    }
    info!("Database worker stopped");
}

/// SQLite handle. All statements run on one dedicated worker thread; callers
/// submit closures and await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    /// Blocks until the worker has opened the file and applied the schema.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (commands_tx, commands_rx) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let path = db_path.clone();

        let thread = thread::Builder::new()
            .name("storyreel-db".into())
            .spawn(move || match open_connection(&path) {
                Ok(conn) => {
                    if opened_tx.send(Ok(())).is_ok() {
                        serve(conn, commands_rx);
                    }
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        opened_rx
            .recv()
            .context("database worker exited during startup")??;
        info!("Database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                commands: commands_tx,
                thread: Mutex::new(Some(thread)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .commands
            .send(Command::Run(job))
            .map_err(|_| anyhow!("database worker is not running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("failed to read key '{key}'"))
        })
        .await
    }

    pub async fn put_value(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write key '{key}'"))?;
            Ok(())
        })
        .await
    }

    pub async fn delete_value(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete key '{key}'"))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_value(key).await
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.put_value(key, bytes).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_value(key).await
    }
}
