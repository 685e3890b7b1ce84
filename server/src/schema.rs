//! SQLite schema, applied idempotently every time the database is opened.

pub static DDL_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS images (
       id          INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
       filename    TEXT NOT NULL UNIQUE,
       hash        TEXT NOT NULL UNIQUE,
       created_at  TEXT NOT NULL
     )",
    "CREATE TABLE IF NOT EXISTS tags (
       id            INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
       name          TEXT NOT NULL,
       category      TEXT NOT NULL,
       last_used_at  TEXT NOT NULL,

       UNIQUE (name, category)
     )",
    "CREATE TABLE IF NOT EXISTS image_tags (
       image_id  INTEGER NOT NULL,
       tag_id    INTEGER NOT NULL,

       PRIMARY KEY (image_id, tag_id),
       FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE,
       FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
     )",
    "CREATE INDEX IF NOT EXISTS image_tags_tag_id ON image_tags (tag_id)",
    "CREATE INDEX IF NOT EXISTS tags_name ON tags (name)",
];
