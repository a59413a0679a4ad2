//! SQL schema for the moodplan SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Plan content columns are written by INSERT only.
-- The viz_* columns are updated at most once, out of 'pending'.
CREATE TABLE IF NOT EXISTS plans (
    record_id        TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    ts               TEXT NOT NULL,   -- sort key; RFC 3339, fixed-width micros
    request_id       TEXT NOT NULL,   -- idempotency key of the submission
    user_text        TEXT NOT NULL,
    emotion          TEXT NOT NULL,
    sentiment_score  INTEGER NOT NULL CHECK (sentiment_score BETWEEN 0 AND 100),
    weekly_plan      TEXT NOT NULL,   -- JSON array of day entries
    is_fallback      INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    viz_status       TEXT NOT NULL DEFAULT 'pending', -- 'pending' | 'completed' | 'failed'
    viz_artifact_ref TEXT,
    viz_error        TEXT,
    viz_resolved_at  TEXT,
    UNIQUE (user_id, ts),
    UNIQUE (user_id, request_id)
);

-- Accepted submissions not yet settled by the orchestrator. A row is
-- deleted once its plan is written or it has been dead-lettered.
CREATE TABLE IF NOT EXISTS ingest_queue (
    user_id      TEXT NOT NULL,
    request_id   TEXT NOT NULL,
    user_text    TEXT NOT NULL,
    submitted_at TEXT NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 0,
    available_at TEXT NOT NULL,   -- lease / backoff deadline
    enqueued_at  TEXT NOT NULL,
    PRIMARY KEY (user_id, request_id)
);

-- One row per record awaiting visualization. A row is deleted only once
-- the record's visualization has been resolved.
CREATE TABLE IF NOT EXISTS visualization_jobs (
    record_id    TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    emotion      TEXT NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 0,
    available_at TEXT NOT NULL,   -- lease / backoff deadline
    enqueued_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dead_letters (
    dead_letter_id TEXT PRIMARY KEY,
    stage          TEXT NOT NULL,   -- 'ingestion' | 'visualization'
    payload        TEXT NOT NULL,   -- JSON
    reason         TEXT NOT NULL,
    attempts       INTEGER NOT NULL,
    recorded_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS ingest_available_idx    ON ingest_queue(available_at, enqueued_at);
CREATE INDEX IF NOT EXISTS jobs_available_idx      ON visualization_jobs(available_at, enqueued_at);
CREATE INDEX IF NOT EXISTS dead_letters_recorded_idx ON dead_letters(recorded_at);

PRAGMA user_version = 2;
";
