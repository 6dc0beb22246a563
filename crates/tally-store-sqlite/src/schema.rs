//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision; later migrations will be gated on it.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// Every table holds a JSON `body` without its `id`, which lives in the
/// primary key column. `AUTOINCREMENT` keeps ids from being reused after a
/// delete.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS surveys (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS respondents (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS survey_respondents (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS survey_questions (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS responses (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

-- Append-only apart from unpublish and survey deletion; duplicates allowed.
CREATE TABLE IF NOT EXISTS published_assignments (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL
);

-- Dedup keys. The resolver checks first; these are the backstop.
CREATE UNIQUE INDEX IF NOT EXISTS respondents_email_key
    ON respondents(json_extract(body, '$.email'));
CREATE UNIQUE INDEX IF NOT EXISTS questions_text_key
    ON questions(json_extract(body, '$.text'));

CREATE INDEX IF NOT EXISTS survey_respondents_survey_idx
    ON survey_respondents(json_extract(body, '$.survey_id'));
CREATE INDEX IF NOT EXISTS survey_respondents_respondent_idx
    ON survey_respondents(json_extract(body, '$.respondent_id'));
CREATE INDEX IF NOT EXISTS survey_questions_survey_idx
    ON survey_questions(json_extract(body, '$.survey_id'));
CREATE INDEX IF NOT EXISTS survey_questions_question_idx
    ON survey_questions(json_extract(body, '$.question_id'));
CREATE INDEX IF NOT EXISTS responses_survey_idx
    ON responses(json_extract(body, '$.survey_id'));
CREATE INDEX IF NOT EXISTS responses_respondent_idx
    ON responses(json_extract(body, '$.respondent_id'));
CREATE INDEX IF NOT EXISTS responses_question_idx
    ON responses(json_extract(body, '$.question_id'));
CREATE INDEX IF NOT EXISTS published_assignments_survey_idx
    ON published_assignments(json_extract(body, '$.survey_id'));
CREATE INDEX IF NOT EXISTS published_assignments_respondent_idx
    ON published_assignments(json_extract(body, '$.respondent_id'));
CREATE INDEX IF NOT EXISTS published_assignments_question_idx
    ON published_assignments(json_extract(body, '$.question_id'));

PRAGMA user_version = 1;
";
