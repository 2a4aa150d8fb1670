//! Persistence seam for computed outputs.
//!
//! [`StateStore`] is what the pipeline needs from storage; [`SqliteStore`] is
//! the bundled implementation. Every write is an upsert, so recomputing a day
//! overwrites the previous result (last write wins). [`AdaptiveService`] adds
//! a per-(athlete, date) writer lock so two recomputations of the same day in
//! one process cannot interleave their read-compute-write steps.

use crate::adaptive::{
    AdaptiveEngine, AdaptiveOutcome, AthleteDailyState, BaselineProfile, DailyDelta,
    PlannedWorkout,
};
use crate::error::{StoreError, TrainFuelError};
use crate::pipeline::ActivityRecord;
use crate::pmc::DayLoad;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// Storage operations the pipeline relies on
pub trait StateStore: Send + Sync {
    fn upsert_daily_state(&self, outcome: &AdaptiveOutcome) -> Result<(), StoreError>;

    fn load_daily_state(
        &self,
        athlete_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AdaptiveOutcome>, StoreError>;

    fn upsert_day_loads(&self, athlete_id: &str, days: &[DayLoad]) -> Result<(), StoreError>;

    fn load_day_load(&self, athlete_id: &str, date: NaiveDate) -> Result<Option<DayLoad>, StoreError>;

    fn upsert_activity(&self, athlete_id: &str, record: &ActivityRecord) -> Result<(), StoreError>;

    /// Activities whose start date lies in `from..=to`, oldest first
    fn load_activities(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityRecord>, StoreError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned {
            key: "connection".to_string(),
        })
    }

    /// Number of stored daily states for an athlete
    pub fn daily_state_count(&self, athlete_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM daily_state WHERE athlete_id = ?1",
            params![athlete_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS daily_state (
            athlete_id TEXT NOT NULL,
            date DATE NOT NULL,
            kcal_target INTEGER NOT NULL,
            glycogen_status TEXT NOT NULL,
            recovery_need TEXT NOT NULL,
            tss_capacity REAL NOT NULL,
            state_json TEXT NOT NULL,
            adaptations_json TEXT NOT NULL,
            computed_at DATETIME NOT NULL,
            PRIMARY KEY (athlete_id, date)
        );

        CREATE TABLE IF NOT EXISTS day_load (
            athlete_id TEXT NOT NULL,
            date DATE NOT NULL,
            tss REAL NOT NULL,
            ctl REAL NOT NULL,
            atl REAL NOT NULL,
            tsb REAL NOT NULL,
            PRIMARY KEY (athlete_id, date)
        );

        CREATE TABLE IF NOT EXISTS activities (
            id TEXT PRIMARY KEY,
            athlete_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            date DATE NOT NULL,
            sport TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL,
            tss REAL NOT NULL,
            record_json TEXT NOT NULL,
            UNIQUE (athlete_id, fingerprint)
        );

        CREATE INDEX IF NOT EXISTS idx_activities_athlete_date ON activities(athlete_id, date);
        "#,
    )?;
    Ok(())
}

impl StateStore for SqliteStore {
    fn upsert_daily_state(&self, outcome: &AdaptiveOutcome) -> Result<(), StoreError> {
        let state = &outcome.state;
        let state_json = serde_json::to_string(state)?;
        let adaptations_json = serde_json::to_string(&outcome.adaptations)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO daily_state (
                athlete_id, date, kcal_target, glycogen_status, recovery_need,
                tss_capacity, state_json, adaptations_json, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (athlete_id, date) DO UPDATE SET
                kcal_target = excluded.kcal_target,
                glycogen_status = excluded.glycogen_status,
                recovery_need = excluded.recovery_need,
                tss_capacity = excluded.tss_capacity,
                state_json = excluded.state_json,
                adaptations_json = excluded.adaptations_json,
                computed_at = excluded.computed_at
            "#,
            params![
                state.athlete_id,
                state.date,
                state.kcal_target,
                state.glycogen_status.to_string(),
                state.recovery_need.to_string(),
                state.tss_capacity,
                state_json,
                adaptations_json,
                state.computed_at,
            ],
        )?;
        Ok(())
    }

    fn load_daily_state(
        &self,
        athlete_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AdaptiveOutcome>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT state_json, adaptations_json FROM daily_state WHERE athlete_id = ?1 AND date = ?2",
                params![athlete_id, date],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        match row {
            Some((state_json, adaptations_json)) => {
                let state: AthleteDailyState = serde_json::from_str(&state_json)?;
                let adaptations = serde_json::from_str(&adaptations_json)?;
                Ok(Some(AdaptiveOutcome { state, adaptations }))
            }
            None => Ok(None),
        }
    }

    fn upsert_day_loads(&self, athlete_id: &str, days: &[DayLoad]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO day_load (athlete_id, date, tss, ctl, atl, tsb)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (athlete_id, date) DO UPDATE SET
                    tss = excluded.tss,
                    ctl = excluded.ctl,
                    atl = excluded.atl,
                    tsb = excluded.tsb
                "#,
            )?;
            for day in days {
                stmt.execute(params![athlete_id, day.date, day.tss, day.ctl, day.atl, day.tsb])?;
            }
        }
        tx.commit()?;
        debug!(athlete_id, days = days.len(), "Stored chronicle days");
        Ok(())
    }

    fn load_day_load(&self, athlete_id: &str, date: NaiveDate) -> Result<Option<DayLoad>, StoreError> {
        let conn = self.conn()?;
        let day = conn
            .query_row(
                "SELECT date, tss, ctl, atl, tsb FROM day_load WHERE athlete_id = ?1 AND date = ?2",
                params![athlete_id, date],
                |row| {
                    Ok(DayLoad {
                        date: row.get(0)?,
                        tss: row.get(1)?,
                        ctl: row.get(2)?,
                        atl: row.get(3)?,
                        tsb: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(day)
    }

    fn upsert_activity(&self, athlete_id: &str, record: &ActivityRecord) -> Result<(), StoreError> {
        let record_json = serde_json::to_string(record)?;
        let summary = &record.summary;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO activities (
                id, athlete_id, fingerprint, date, sport, duration_seconds, tss, record_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (athlete_id, fingerprint) DO UPDATE SET
                date = excluded.date,
                sport = excluded.sport,
                duration_seconds = excluded.duration_seconds,
                tss = excluded.tss,
                record_json = excluded.record_json
            "#,
            params![
                record.id.to_string(),
                athlete_id,
                record.fingerprint,
                summary.date(),
                summary.activity_type.to_string(),
                summary.duration_seconds,
                summary.tss,
                record_json,
            ],
        )?;
        Ok(())
    }

    fn load_activities(
        &self,
        athlete_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_json FROM activities
             WHERE athlete_id = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date, id",
        )?;
        let rows = stmt.query_map(params![athlete_id, from, to], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for json in rows {
            records.push(serde_json::from_str(&json?)?);
        }
        Ok(records)
    }
}

type WriterKey = (String, NaiveDate);

/// Engine plus store, with single-writer discipline per athlete-date
pub struct AdaptiveService<S: StateStore> {
    engine: AdaptiveEngine,
    store: S,
    writers: Mutex<HashMap<WriterKey, Arc<Mutex<()>>>>,
}

impl<S: StateStore> AdaptiveService<S> {
    pub fn new(engine: AdaptiveEngine, store: S) -> Self {
        Self {
            engine,
            store,
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &AdaptiveEngine {
        &self.engine
    }

    fn writer_lock(&self, key: &WriterKey) -> Result<Arc<Mutex<()>>, StoreError> {
        let mut writers = self.writers.lock().map_err(|_| StoreError::LockPoisoned {
            key: "writer registry".to_string(),
        })?;
        Ok(writers.entry(key.clone()).or_default().clone())
    }

    fn release_writer(&self, key: &WriterKey, lock: Arc<Mutex<()>>) {
        if let Ok(mut writers) = self.writers.lock() {
            // Registry entry plus ours: nobody else is waiting
            if Arc::strong_count(&lock) == 2 {
                writers.remove(key);
            }
        }
    }

    /// Recompute and persist the state for one athlete-date.
    ///
    /// The stored chronicle day for `date` (if any) feeds the fatigue score
    /// and capacity.
    #[instrument(skip(self, deltas, planned, baseline))]
    pub fn recompute(
        &self,
        athlete_id: &str,
        date: NaiveDate,
        deltas: &[DailyDelta],
        planned: Option<&PlannedWorkout>,
        baseline: Option<&BaselineProfile>,
    ) -> Result<AdaptiveOutcome, TrainFuelError> {
        let key = (athlete_id.to_string(), date);
        let lock = self.writer_lock(&key)?;

        let result = {
            let _guard = lock.lock().map_err(|_| StoreError::LockPoisoned {
                key: format!("{}/{}", athlete_id, date),
            })?;
            self.compute_and_store(athlete_id, date, deltas, planned, baseline)
        };

        self.release_writer(&key, lock);
        result
    }

    fn compute_and_store(
        &self,
        athlete_id: &str,
        date: NaiveDate,
        deltas: &[DailyDelta],
        planned: Option<&PlannedWorkout>,
        baseline: Option<&BaselineProfile>,
    ) -> Result<AdaptiveOutcome, TrainFuelError> {
        let load = self.store.load_day_load(athlete_id, date)?;
        let outcome = self
            .engine
            .compute(athlete_id, date, deltas, planned, baseline, load.as_ref())?;
        self.store.upsert_daily_state(&outcome)?;

        info!(
            athlete_id,
            %date,
            recovery_need = %outcome.state.recovery_need,
            "Stored daily state"
        );
        Ok(outcome)
    }
}
