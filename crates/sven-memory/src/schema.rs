// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
    id                 TEXT PRIMARY KEY,
    project_path       TEXT NOT NULL,
    model_id           TEXT NOT NULL,
    model_label        TEXT NOT NULL,
    title              TEXT NOT NULL,
    tags               TEXT NOT NULL DEFAULT '[]',
    parent_session_id  TEXT,
    parent_sequence    INTEGER,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    message_count      INTEGER NOT NULL DEFAULT 0,
    user_renamed       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    session_id            TEXT NOT NULL,
    sequence               INTEGER NOT NULL,
    role                   TEXT NOT NULL,
    content                TEXT NOT NULL,
    input_tokens           INTEGER,
    output_tokens          INTEGER,
    cache_creation_tokens  INTEGER,
    cache_read_tokens      INTEGER,
    created_at             TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS compactions (
    session_id      TEXT PRIMARY KEY,
    cutoff_sequence INTEGER NOT NULL,
    summary_text    TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS scheduled_tool_jobs (
    id                 TEXT PRIMARY KEY,
    tool_name          TEXT NOT NULL,
    tool_input         TEXT NOT NULL,
    scheduled_for      TEXT NOT NULL,
    recurrence         TEXT NOT NULL,
    status             TEXT NOT NULL,
    result             TEXT,
    error              TEXT,
    created_at         TEXT NOT NULL,
    last_attempted_at  TEXT
);

CREATE INDEX IF NOT EXISTS idx_scheduled_tool_jobs_due
    ON scheduled_tool_jobs (status, scheduled_for);

-- Legacy table: rows here are translated at the store boundary into
-- ScheduledToolJob{tool_name: "x_post"} rather than read directly by
-- any caller above the store (see `legacy::scheduled_tweet_to_job`).
CREATE TABLE IF NOT EXISTS scheduled_tweets (
    id             TEXT PRIMARY KEY,
    tweet_text     TEXT NOT NULL,
    scheduled_for  TEXT NOT NULL,
    status         TEXT NOT NULL,
    tweet_id       TEXT,
    error          TEXT,
    created_at     TEXT NOT NULL
);
"#;
