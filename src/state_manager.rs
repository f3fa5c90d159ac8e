// State Manager for the monitor worker
// SQLite authoritative record plus a JSON restart snapshot
//
// The worker writes through `StateStore`, which fans each save out to every
// backend. External readers open the SQLite record directly.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::{RuntimeState, Signal, SignalKind, Snapshot};

/// Page size used by signal listings when no limit is given
pub const DEFAULT_SIGNAL_PAGE: usize = 20;

/// One place the worker's state is persisted to
pub trait StateBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Persist one cycle's state as a single atomic write
    fn save(&self, state: &RuntimeState) -> Result<()>;

    /// Restart-recovery data from a previous run, if any
    fn load_initial(&self) -> Result<Option<Snapshot>>;

    fn append_signal(&self, _signal: &Signal) -> Result<()> {
        Ok(())
    }

    fn mark_stopped(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// JSON snapshot backend
// =============================================================================

/// Local file holding reference price, last grid index and trailing high
pub struct JsonSnapshot {
    path: PathBuf,
}

impl JsonSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSnapshot { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for JsonSnapshot {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn save(&self, state: &RuntimeState) -> Result<()> {
        let Some(snapshot) = state.snapshot() else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a torn file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn load_initial(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("Ignoring unreadable snapshot {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }
}

// =============================================================================
// SQLite authoritative record
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateManager {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL lets the query layer read while the worker writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.create_tables()?;
        debug!("SQLite state manager initialized");
        Ok(manager)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("state database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runtime_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                running INTEGER NOT NULL DEFAULT 0,
                ref_price REAL,
                trailing_high REAL,
                last_level_idx INTEGER,
                atr REAL,
                eff_grid_step REAL,
                atr_trailing_stop REAL,
                stop_line REAL,
                last_kind TEXT,
                last_message TEXT,
                last_price REAL,
                last_pnl_pct REAL,
                updated_at TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                price REAL,
                pnl_pct REAL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // singleton row exists from the start so readers always see a record
        conn.execute(
            "INSERT OR IGNORE INTO runtime_state (id, running) VALUES (1, 0)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_state(&self, state: &RuntimeState) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT OR REPLACE INTO runtime_state
             (id, running, ref_price, trailing_high, last_level_idx, atr,
              eff_grid_step, atr_trailing_stop, stop_line, last_kind,
              last_message, last_price, last_pnl_pct, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                state.running,
                state.ref_price,
                state.trailing_high,
                state.last_level_idx.map(|i| i as i64),
                state.atr,
                state.eff_grid_step,
                state.atr_trailing_stop,
                state.stop_line,
                state.last_kind.map(|k| k.as_str()),
                state.last_message,
                state.last_price,
                state.last_pnl_pct,
                state.updated_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        debug!(
            "State saved: running={} trailing_high={:?} idx={:?}",
            state.running, state.trailing_high, state.last_level_idx
        );
        Ok(())
    }

    /// Current record; a never-started worker reads as the default state
    pub fn load_state(&self) -> Result<RuntimeState> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT running, ref_price, trailing_high, last_level_idx, atr,
                        eff_grid_step, atr_trailing_stop, stop_line, last_kind,
                        last_message, last_price, last_pnl_pct, updated_at
                 FROM runtime_state WHERE id = 1",
                [],
                |row| {
                    Ok(RuntimeState {
                        running: row.get(0)?,
                        ref_price: row.get(1)?,
                        trailing_high: row.get(2)?,
                        last_level_idx: row
                            .get::<_, Option<i64>>(3)?
                            .and_then(|i| usize::try_from(i).ok()),
                        atr: row.get(4)?,
                        eff_grid_step: row.get(5)?,
                        atr_trailing_stop: row.get(6)?,
                        stop_line: row.get(7)?,
                        last_kind: row
                            .get::<_, Option<String>>(8)?
                            .and_then(|k| k.parse::<SignalKind>().ok()),
                        last_message: row.get(9)?,
                        last_price: row.get(10)?,
                        last_pnl_pct: row.get(11)?,
                        updated_at: row.get::<_, Option<String>>(12)?.and_then(|t| parse_time(&t)),
                    })
                },
            )
            .optional()?;

        Ok(state.unwrap_or_default())
    }

    pub fn set_running(&self, running: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runtime_state SET running = ?1, updated_at = ?2 WHERE id = 1",
            params![running, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Append a signal to the log.
    ///
    /// The `runtime_state` row is left alone: the last-alert fields travel
    /// with the cycle's single `save_state`, so a reader never sees one
    /// cycle's alert next to another cycle's grid position.
    pub fn record_signal(&self, signal: &Signal) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO signals (kind, message, price, pnl_pct, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signal.kind.as_str(),
                signal.message,
                signal.price,
                signal.pnl_pct,
                signal.created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(
            "Signal recorded: [{}] price={:?} pnl={:?}",
            signal.kind, signal.price, signal.pnl_pct
        );
        Ok(id)
    }

    /// Most recent signals first
    pub fn recent_signals(&self, limit: usize) -> Result<Vec<Signal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, message, price, pnl_pct, created_at
             FROM signals ORDER BY id DESC LIMIT ?1",
        )?;

        let signals = stmt
            .query_map(params![limit as i64], |row| {
                let kind: String = row.get(1)?;
                let created_at: String = row.get(5)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    kind,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    created_at,
                ))
            })?
            .filter_map(|row| match row {
                Ok((id, kind, message, price, pnl_pct, created_at)) => {
                    let kind = kind.parse::<SignalKind>().ok()?;
                    Some(Ok(Signal {
                        id: Some(id),
                        kind,
                        message,
                        price,
                        pnl_pct,
                        created_at: parse_time(&created_at).unwrap_or_default(),
                    }))
                }
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} signals", signals.len());
        Ok(signals)
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl StateBackend for SqliteStateManager {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn save(&self, state: &RuntimeState) -> Result<()> {
        self.save_state(state)
    }

    fn load_initial(&self) -> Result<Option<Snapshot>> {
        Ok(self.load_state()?.snapshot())
    }

    fn append_signal(&self, signal: &Signal) -> Result<()> {
        self.record_signal(signal).map(|_| ())
    }

    fn mark_stopped(&self) -> Result<()> {
        self.set_running(false)
    }
}

// =============================================================================
// StateStore
// =============================================================================

/// Fan-out over every state backend.
///
/// Failures are logged per backend and reported once as a
/// `PersistenceFailure`; a failing backend never stops the others.
#[derive(Clone)]
pub struct StateStore {
    backends: Vec<Arc<dyn StateBackend>>,
}

impl StateStore {
    pub fn new(backends: Vec<Arc<dyn StateBackend>>) -> Self {
        StateStore { backends }
    }

    /// Snapshot file first so recovery prefers the worker's own copy
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        let record = SqliteStateManager::open(storage.db_path())?;
        let snapshot = JsonSnapshot::new(storage.snapshot_path());
        info!(
            "State store: record={} snapshot={}",
            storage.db_path().display(),
            snapshot.path().display()
        );
        let backends: Vec<Arc<dyn StateBackend>> = vec![Arc::new(snapshot), Arc::new(record)];
        Ok(Self::new(backends))
    }

    fn for_each(
        &self,
        op: &str,
        f: impl Fn(&dyn StateBackend) -> Result<()>,
    ) -> MonitorResult<()> {
        let mut first_error = None;
        for backend in &self.backends {
            if let Err(e) = f(backend.as_ref()) {
                warn!("{} failed on {} backend: {:#}", op, backend.name(), e);
                first_error.get_or_insert_with(|| MonitorError::persistence(backend.name(), format!("{:#}", e)));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn save(&self, state: &RuntimeState) -> MonitorResult<()> {
        self.for_each("save", |b| b.save(state))
    }

    pub fn append_signal(&self, signal: &Signal) -> MonitorResult<()> {
        self.for_each("append_signal", |b| b.append_signal(signal))
    }

    pub fn mark_stopped(&self) -> MonitorResult<()> {
        self.for_each("mark_stopped", |b| b.mark_stopped())
    }

    /// First snapshot any backend can provide
    pub fn load_initial(&self) -> Option<Snapshot> {
        for backend in &self.backends {
            match backend.load_initial() {
                Ok(Some(snapshot)) => {
                    debug!("Recovered snapshot from {} backend", backend.name());
                    return Some(snapshot);
                }
                Ok(None) => {}
                Err(e) => warn!("load_initial failed on {} backend: {:#}", backend.name(), e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> RuntimeState {
        RuntimeState {
            running: true,
            ref_price: Some(0.25),
            trailing_high: Some(0.27),
            last_level_idx: Some(9),
            atr: Some(0.0012),
            eff_grid_step: Some(0.29),
            atr_trailing_stop: Some(0.2664),
            stop_line: Some(0.2664),
            updated_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_record_reads_as_default() {
        let db = SqliteStateManager::in_memory().unwrap();
        let state = db.load_state().unwrap();
        assert_eq!(state, RuntimeState::default());
        assert!(db.load_initial().unwrap().is_none());
    }

    #[test]
    fn test_state_round_trip_and_stop() {
        let db = SqliteStateManager::in_memory().unwrap();
        let state = sample_state();
        db.save_state(&state).unwrap();

        let loaded = db.load_state().unwrap();
        assert!(loaded.running);
        assert_eq!(loaded.last_level_idx, Some(9));
        assert_eq!(loaded.eff_grid_step, Some(0.29));

        db.set_running(false).unwrap();
        let loaded = db.load_state().unwrap();
        assert!(!loaded.running);
        assert_eq!(loaded.trailing_high, Some(0.27));
    }

    #[test]
    fn test_signals_newest_first_and_bounded() {
        let db = SqliteStateManager::in_memory().unwrap();
        for i in 0..25 {
            let signal = Signal::new(SignalKind::Grid, format!("cross {}", i), Some(1.0 + i as f64), Some(0.5));
            db.record_signal(&signal).unwrap();
        }

        let page = db.recent_signals(DEFAULT_SIGNAL_PAGE).unwrap();
        assert_eq!(page.len(), 20);
        assert_eq!(page[0].message, "cross 24");
        assert_eq!(page[19].message, "cross 5");
    }

    #[test]
    fn test_signal_append_leaves_state_row_untouched() {
        let db = SqliteStateManager::in_memory().unwrap();
        let state = sample_state();
        db.save_state(&state).unwrap();

        db.record_signal(&Signal::new(SignalKind::Stop, "below stop", Some(0.2), Some(-20.0)))
            .unwrap();

        assert_eq!(db.load_state().unwrap(), state);
        assert_eq!(db.recent_signals(1).unwrap()[0].kind, SignalKind::Stop);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = JsonSnapshot::new(dir.path().join("nested").join("grid_state.json"));
        assert!(snapshot.load_initial().unwrap().is_none());

        snapshot.save(&sample_state()).unwrap();
        let loaded = snapshot.load_initial().unwrap().unwrap();
        assert_eq!(loaded.ref_price, 0.25);
        assert_eq!(loaded.last_level_idx, 9);
        assert_eq!(loaded.trailing_high, 0.27);
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid_state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonSnapshot::new(&path).load_initial().unwrap().is_none());
    }

    #[test]
    fn test_store_fans_out_and_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let record = Arc::new(SqliteStateManager::in_memory().unwrap());
        // a directory where the snapshot file should be makes every write fail
        let blocked = dir.path().join("blocked.json");
        fs::create_dir_all(&blocked).unwrap();

        let backends: Vec<Arc<dyn StateBackend>> =
            vec![Arc::new(JsonSnapshot::new(&blocked)), record.clone()];
        let store = StateStore::new(backends);

        let err = store.save(&sample_state()).unwrap_err();
        assert!(matches!(err, MonitorError::PersistenceFailure { backend: "snapshot", .. }));
        // the healthy backend still got the write
        assert_eq!(record.load_state().unwrap().trailing_high, Some(0.27));
        assert_eq!(store.load_initial().map(|s| s.last_level_idx), Some(9));
    }

    #[test]
    fn test_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            state_dir: dir.path().to_path_buf(),
        };
        let store = StateStore::from_config(&storage).unwrap();
        assert!(store.load_initial().is_none());

        let signal = Signal::new(SignalKind::Startup, "on", None, None);
        let mut state = sample_state();
        state.record_signal(&signal);
        store.append_signal(&signal).unwrap();
        store.save(&state).unwrap();
        store.mark_stopped().unwrap();

        let reader = SqliteStateManager::open(storage.db_path()).unwrap();
        let state = reader.load_state().unwrap();
        assert!(!state.running);
        assert_eq!(state.last_kind, Some(SignalKind::Startup));
        assert_eq!(reader.recent_signals(DEFAULT_SIGNAL_PAGE).unwrap().len(), 1);
        assert!(storage.snapshot_path().exists());
    }
}
