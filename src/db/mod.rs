use chrono::{NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::PersistenceError;

pub mod models;
use models::*;

type Result<T> = std::result::Result<T, PersistenceError>;

/// Thread-safe SQLite handle (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    // ── Cursor ───────────────────────────────────────────────────────────────

    pub fn get_cursor(&self) -> Result<FetchCursor> {
        let conn = self.lock()?;
        let cursor = conn.query_row(
            "SELECT last_completed, last_run_at, status FROM fetch_cursor WHERE id = 1",
            [],
            |row| {
                Ok(FetchCursor {
                    last_completed: row.get(0)?,
                    last_run_at: row.get(1)?,
                    status: row.get(2)?,
                })
            },
        )?;
        Ok(cursor)
    }

    /// Mark `date` as the last fully committed date. Never moves backwards;
    /// returns whether the cursor changed.
    pub fn advance_cursor(&self, date: NaiveDate) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE fetch_cursor SET last_completed = ?1
             WHERE id = 1 AND (last_completed IS NULL OR last_completed < ?1)",
            params![date],
        )?;
        Ok(changed > 0)
    }

    /// Record the outcome of a run on the cursor row.
    pub fn mark_run(&self, status: CursorStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE fetch_cursor SET status = ?1, last_run_at = ?2 WHERE id = 1",
            params![status, Utc::now()],
        )?;
        Ok(())
    }

    // ── Game records ─────────────────────────────────────────────────────────

    /// Upsert every record for `date` in one transaction. Identical rows are
    /// left untouched; changed rows are overwritten by key. Nothing is
    /// committed if any record fails.
    pub fn write_batch(&self, date: NaiveDate, records: &[GameRecord]) -> Result<WriteStats> {
        if let Some(bad) = records.iter().find(|r| r.game_date != date) {
            return Err(PersistenceError::DateMismatch {
                expected: date,
                found: bad.game_date,
                game_id: bad.game_id.clone(),
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut stats = WriteStats::default();
        {
            let mut select = tx.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM game_records WHERE game_id = ?1 AND team_id = ?2"
            ))?;
            let mut upsert = tx.prepare(UPSERT_SQL)?;

            for record in records {
                let existing = select
                    .query_row(params![record.game_id, record.team_id], map_record)
                    .optional()?;
                match existing {
                    Some(ref current) if current == record => {
                        stats.unchanged += 1;
                        continue;
                    }
                    Some(_) => stats.updated += 1,
                    None => stats.inserted += 1,
                }
                upsert.execute(params![
                    record.game_id,
                    record.game_date,
                    record.season_id,
                    record.team_id,
                    record.team_abbreviation,
                    record.opponent_team_id,
                    record.matchup,
                    record.win_loss,
                    record.minutes,
                    record.points,
                    record.fgm,
                    record.fga,
                    record.fg3m,
                    record.fg3a,
                    record.ftm,
                    record.fta,
                    record.oreb,
                    record.dreb,
                    record.reb,
                    record.ast,
                    record.stl,
                    record.blk,
                    record.tov,
                    record.pf,
                    record.plus_minus,
                    Utc::now(),
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            "Committed {} for {}: {} inserted, {} updated, {} unchanged",
            records.len(),
            date,
            stats.inserted,
            stats.updated,
            stats.unchanged
        );
        Ok(stats)
    }

    /// List stored records in `[from, to]` (either bound optional), ordered
    /// by date, game and team.
    pub fn list_records(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<GameRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM game_records
             WHERE (?1 IS NULL OR game_date >= ?1) AND (?2 IS NULL OR game_date <= ?2)
             ORDER BY game_date, game_id, team_id"
        ))?;
        let records = stmt
            .query_map(params![from, to], map_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ── Run log ──────────────────────────────────────────────────────────────

    pub fn insert_run(&self, run: &IngestRun) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ingest_runs (
                started_at, finished_at, state, range_start, range_end,
                committed, partial, failed, skipped, report_json
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                run.started_at,
                run.finished_at,
                run.state,
                run.range_start,
                run.range_end,
                run.committed,
                run.partial,
                run.failed,
                run.skipped,
                run.report_json,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_recent_runs(&self, limit: i64) -> Result<Vec<IngestRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, state, range_start, range_end,
                    committed, partial, failed, skipped, report_json
             FROM ingest_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit], |row| {
                Ok(IngestRun {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    state: row.get(3)?,
                    range_start: row.get(4)?,
                    range_end: row.get(5)?,
                    committed: row.get(6)?,
                    partial: row.get(7)?,
                    failed: row.get(8)?,
                    skipped: row.get(9)?,
                    report_json: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

impl ToSql for CursorStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for CursorStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| CursorStatus::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

const RECORD_COLUMNS: &str = "game_id, game_date, season_id, team_id, team_abbreviation,
    opponent_team_id, matchup, win_loss, minutes, points, fgm, fga, fg3m, fg3a,
    ftm, fta, oreb, dreb, reb, ast, stl, blk, tov, pf, plus_minus";

const UPSERT_SQL: &str = "INSERT INTO game_records (
        game_id, game_date, season_id, team_id, team_abbreviation,
        opponent_team_id, matchup, win_loss, minutes, points, fgm, fga, fg3m, fg3a,
        ftm, fta, oreb, dreb, reb, ast, stl, blk, tov, pf, plus_minus, updated_at
     ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26)
     ON CONFLICT(game_id, team_id) DO UPDATE SET
        game_date=excluded.game_date,
        season_id=excluded.season_id,
        team_abbreviation=excluded.team_abbreviation,
        opponent_team_id=excluded.opponent_team_id,
        matchup=excluded.matchup,
        win_loss=excluded.win_loss,
        minutes=excluded.minutes,
        points=excluded.points,
        fgm=excluded.fgm,
        fga=excluded.fga,
        fg3m=excluded.fg3m,
        fg3a=excluded.fg3a,
        ftm=excluded.ftm,
        fta=excluded.fta,
        oreb=excluded.oreb,
        dreb=excluded.dreb,
        reb=excluded.reb,
        ast=excluded.ast,
        stl=excluded.stl,
        blk=excluded.blk,
        tov=excluded.tov,
        pf=excluded.pf,
        plus_minus=excluded.plus_minus,
        updated_at=excluded.updated_at";

fn map_record(row: &rusqlite::Row) -> rusqlite::Result<GameRecord> {
    Ok(GameRecord {
        game_id: row.get(0)?,
        game_date: row.get(1)?,
        season_id: row.get(2)?,
        team_id: row.get(3)?,
        team_abbreviation: row.get(4)?,
        opponent_team_id: row.get(5)?,
        matchup: row.get(6)?,
        win_loss: row.get(7)?,
        minutes: row.get(8)?,
        points: row.get(9)?,
        fgm: row.get(10)?,
        fga: row.get(11)?,
        fg3m: row.get(12)?,
        fg3a: row.get(13)?,
        ftm: row.get(14)?,
        fta: row.get(15)?,
        oreb: row.get(16)?,
        dreb: row.get(17)?,
        reb: row.get(18)?,
        ast: row.get(19)?,
        stl: row.get(20)?,
        blk: row.get(21)?,
        tov: row.get(22)?,
        pf: row.get(23)?,
        plus_minus: row.get(24)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS game_records (
    game_id           TEXT    NOT NULL,
    game_date         TEXT    NOT NULL,
    season_id         TEXT    NOT NULL,
    team_id           INTEGER NOT NULL,
    team_abbreviation TEXT    NOT NULL,
    opponent_team_id  INTEGER NOT NULL,
    matchup           TEXT    NOT NULL,
    win_loss          TEXT,
    minutes           REAL    NOT NULL,
    points            INTEGER NOT NULL,
    fgm               INTEGER NOT NULL,
    fga               INTEGER NOT NULL,
    fg3m              INTEGER NOT NULL,
    fg3a              INTEGER NOT NULL,
    ftm               INTEGER NOT NULL,
    fta               INTEGER NOT NULL,
    oreb              INTEGER NOT NULL,
    dreb              INTEGER NOT NULL,
    reb               INTEGER NOT NULL,
    ast               INTEGER NOT NULL,
    stl               INTEGER NOT NULL,
    blk               INTEGER NOT NULL,
    tov               INTEGER NOT NULL,
    pf                INTEGER NOT NULL,
    plus_minus        INTEGER NOT NULL,
    updated_at        TEXT    NOT NULL,
    PRIMARY KEY (game_id, team_id)
);

CREATE TABLE IF NOT EXISTS fetch_cursor (
    id             INTEGER PRIMARY KEY CHECK (id = 1),
    last_completed TEXT,
    last_run_at    TEXT,
    status         TEXT    NOT NULL DEFAULT 'success'
);

INSERT OR IGNORE INTO fetch_cursor (id, status) VALUES (1, 'success');

CREATE TABLE IF NOT EXISTS ingest_runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at  TEXT    NOT NULL,
    finished_at TEXT    NOT NULL,
    state       TEXT    NOT NULL,
    range_start TEXT,
    range_end   TEXT,
    committed   INTEGER NOT NULL,
    partial     INTEGER NOT NULL,
    failed      INTEGER NOT NULL,
    skipped     INTEGER NOT NULL,
    report_json TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_game_records_date ON game_records(game_date);
"#;
