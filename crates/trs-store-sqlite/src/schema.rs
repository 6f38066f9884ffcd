//! SQL schema for the TRS SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Provisioned administratively; only next_trn and is_exhausted ever change.
CREATE TABLE IF NOT EXISTS trn_ranges (
    from_trn     INTEGER PRIMARY KEY,
    to_trn       INTEGER NOT NULL,
    next_trn     INTEGER NOT NULL,
    is_exhausted INTEGER NOT NULL DEFAULT 0,
    CHECK (from_trn <= to_trn),
    CHECK (to_trn <= 9999999),
    CHECK (from_trn <= next_trn AND next_trn <= to_trn + 1),
    CHECK (is_exhausted = (next_trn > to_trn))
);

CREATE TABLE IF NOT EXISTS persons (
    person_id                 TEXT PRIMARY KEY,
    trn                       TEXT UNIQUE,      -- 7 digits, zero-padded
    first_name                TEXT NOT NULL DEFAULT '',
    middle_name               TEXT NOT NULL DEFAULT '',
    last_name                 TEXT NOT NULL DEFAULT '',
    national_insurance_number TEXT,
    created_at                TEXT NOT NULL,
    deleted_at                TEXT
);

CREATE TABLE IF NOT EXISTS previous_names (
    previous_name_id TEXT PRIMARY KEY,
    person_id        TEXT NOT NULL REFERENCES persons(person_id),
    first_name       TEXT NOT NULL DEFAULT '',
    middle_name      TEXT NOT NULL DEFAULT '',
    last_name        TEXT NOT NULL DEFAULT '',
    created_at       TEXT NOT NULL,
    deleted_at       TEXT
);

CREATE TABLE IF NOT EXISTS employments (
    employment_id             TEXT PRIMARY KEY,
    person_id                 TEXT NOT NULL REFERENCES persons(person_id),
    employment_key            TEXT NOT NULL UNIQUE,
    postcode                  TEXT,
    email                     TEXT,
    national_insurance_number TEXT,
    updated_at                TEXT NOT NULL,
    deleted_at                TEXT
);

-- Derived rows. Written only by the resync inside a unit of work.
CREATE TABLE IF NOT EXISTS person_search_attributes (
    attribute_id    TEXT PRIMARY KEY,
    person_id       TEXT NOT NULL REFERENCES persons(person_id),
    attribute_type  TEXT NOT NULL,
    attribute_value TEXT NOT NULL,
    tags            TEXT NOT NULL DEFAULT '[]',
    attribute_key   TEXT
);

CREATE TABLE IF NOT EXISTS name_synonyms (
    name     TEXT PRIMARY KEY COLLATE NOCASE,
    synonyms TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS previous_names_person_idx ON previous_names(person_id);
CREATE INDEX IF NOT EXISTS employments_person_idx    ON employments(person_id);

CREATE INDEX IF NOT EXISTS attributes_lookup_idx
    ON person_search_attributes(attribute_type, attribute_value);
CREATE INDEX IF NOT EXISTS attributes_person_idx
    ON person_search_attributes(person_id);
CREATE UNIQUE INDEX IF NOT EXISTS attributes_keyed_slot_idx
    ON person_search_attributes(person_id, attribute_type, attribute_key)
    WHERE attribute_key IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS attributes_valued_slot_idx
    ON person_search_attributes(person_id, attribute_type, attribute_value)
    WHERE attribute_key IS NULL;

PRAGMA user_version = 1;
";
