pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT    NOT NULL UNIQUE,
    lower_user_id TEXT    NOT NULL,
    display_name  TEXT,
    email         TEXT,
    backend       TEXT    NOT NULL,
    state         INTEGER NOT NULL DEFAULT 0,
    quota         TEXT,
    home          TEXT    NOT NULL,
    last_login    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS accounts_lower_user_id ON accounts (lower_user_id);
CREATE INDEX IF NOT EXISTS accounts_display_name ON accounts (display_name);

CREATE TABLE IF NOT EXISTS backend_groups (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id     TEXT    NOT NULL UNIQUE,
    display_name TEXT,
    backend      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    backend_group_id INTEGER NOT NULL REFERENCES backend_groups (id),
    account_id       INTEGER NOT NULL REFERENCES accounts (id),
    membership_type  INTEGER NOT NULL,
    UNIQUE (backend_group_id, account_id, membership_type)
);
CREATE INDEX IF NOT EXISTS memberships_account_id ON memberships (account_id);

CREATE TABLE IF NOT EXISTS account_terms (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
    term       TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS account_terms_account_id ON account_terms (account_id);
CREATE INDEX IF NOT EXISTS account_terms_term ON account_terms (term);
"#;
