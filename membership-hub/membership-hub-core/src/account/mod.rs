//! Account persistence.
//!
//! Accounts are provisioned by the user management services; the membership
//! layer only reads them to resolve uids and to hydrate query results.

use crate::db::{self, Database, LIKE_ESCAPE, LOWER_FN};
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const TABLE: &str = "accounts";
pub(crate) const TERMS_TABLE: &str = "account_terms";

/// Columns of `accounts`, in the order `map_row` expects to find them by name.
pub(crate) const COLUMNS: [&str; 10] = [
    "id",
    "user_id",
    "lower_user_id",
    "display_name",
    "email",
    "backend",
    "state",
    "quota",
    "home",
    "last_login",
];

/// Lifecycle state of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    #[default]
    Initial,
    Enabled,
    Disabled,
    Deleted,
}

impl AccountState {
    pub fn as_i64(self) -> i64 {
        match self {
            AccountState::Initial => 0,
            AccountState::Enabled => 1,
            AccountState::Disabled => 2,
            AccountState::Deleted => 3,
        }
    }
}

impl TryFrom<i64> for AccountState {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(AccountState::Initial),
            1 => Ok(AccountState::Enabled),
            2 => Ok(AccountState::Disabled),
            3 => Ok(AccountState::Deleted),
            other => Err(Error::InvalidState(other)),
        }
    }
}

impl ToSql for AccountState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for AccountState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        AccountState::try_from(raw).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub user_id: String,
    pub lower_user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub backend: String,
    pub state: AccountState,
    pub quota: Option<String>,
    pub home: String,
    /// Unix seconds, 0 when the account never logged in.
    pub last_login: i64,
}

impl Account {
    pub fn last_login_at(&self) -> Option<DateTime<Utc>> {
        if self.last_login <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.last_login, 0).single()
    }

    /// Display name, falling back to the uid.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}

/// Values for a new account row. The id and lowercased uid are derived.
#[derive(Clone, Debug, Default)]
pub struct NewAccount {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub backend: String,
    pub state: AccountState,
    pub quota: Option<String>,
    pub home: String,
}

impl NewAccount {
    pub fn new(user_id: impl Into<String>, backend: impl Into<String>, home: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            backend: backend.into(),
            home: home.into(),
            state: AccountState::Enabled,
            ..Default::default()
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn quota(mut self, quota: impl Into<String>) -> Self {
        self.quota = Some(quota.into());
        self
    }

    pub fn state(mut self, state: AccountState) -> Self {
        self.state = state;
        self
    }
}

/// Column an account search runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountSearchField {
    UserId,
    LowerUserId,
    DisplayName,
    Email,
}

impl AccountSearchField {
    fn column(self) -> &'static str {
        match self {
            AccountSearchField::UserId => "user_id",
            AccountSearchField::LowerUserId => "lower_user_id",
            AccountSearchField::DisplayName => "display_name",
            AccountSearchField::Email => "email",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, new: NewAccount) -> Result<Account> {
        let lower_user_id = new.user_id.to_lowercase();
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO accounts (user_id, lower_user_id, display_name, email, backend, state, quota, home)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.user_id,
                lower_user_id,
                new.display_name,
                new.email,
                new.backend,
                new.state,
                new.quota,
                new.home,
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, user_id = %new.user_id, "account inserted");
        Ok(Account {
            id,
            user_id: new.user_id,
            lower_user_id,
            display_name: new.display_name,
            email: new.email,
            backend: new.backend,
            state: new.state,
            quota: new.quota,
            home: new.home,
            last_login: 0,
        })
    }

    /// Look up an account by its external uid (exact match).
    pub fn get_by_uid(&self, uid: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM {TABLE} WHERE user_id = ?1", COLUMNS.join(", "));
        let conn = self.db.conn();
        Ok(conn.query_row(&sql, [uid], Self::map_row).optional()?)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let sql = format!("SELECT {} FROM {TABLE} WHERE id = ?1", COLUMNS.join(", "));
        let conn = self.db.conn();
        Ok(conn.query_row(&sql, [id], Self::map_row).optional()?)
    }

    /// Delete an account. Fails with a constraint error while the account
    /// still has memberships.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let deleted = conn.execute("DELETE FROM accounts WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn set_state(&self, id: i64, state: AccountState) -> Result<bool> {
        let conn = self.db.conn();
        let updated = conn.execute(
            "UPDATE accounts SET state = ?1 WHERE id = ?2",
            params![state, id],
        )?;
        Ok(updated > 0)
    }

    /// Replace all search terms of an account. Terms are stored lowercased.
    pub fn set_terms<S: AsRef<str>>(&self, account_id: i64, terms: &[S]) -> Result<()> {
        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM account_terms WHERE account_id = ?1", [account_id])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO account_terms (account_id, term) VALUES (?1, ?2)")?;
            for term in terms {
                stmt.execute(params![account_id, term.as_ref().to_lowercase()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn terms(&self, account_id: i64) -> Result<Vec<String>> {
        let conn = self.db.conn();
        let mut stmt =
            conn.prepare("SELECT term FROM account_terms WHERE account_id = ?1 ORDER BY id")?;
        let terms = stmt
            .query_map([account_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(terms)
    }

    /// Case-insensitive substring search on one column, ordered by it.
    pub fn search(
        &self,
        field: AccountSearchField,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Account>> {
        let column = field.column();
        let sql = format!(
            "SELECT {cols} FROM {TABLE} WHERE {LOWER_FN}({column}) LIKE ?1 ESCAPE '{LIKE_ESCAPE}' ORDER BY {column}, id{page}",
            cols = COLUMNS.join(", "),
            page = db::page_clause(limit, offset),
        );
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([db::like_pattern(&pattern.to_lowercase(), true)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Build an account from a row that carries every column of `COLUMNS`.
    pub fn map_row(row: &Row<'_>) -> rusqlite::Result<Account> {
        Ok(Account {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            lower_user_id: row.get("lower_user_id")?,
            display_name: row.get("display_name")?,
            email: row.get("email")?,
            backend: row.get("backend")?,
            state: row.get("state")?,
            quota: row.get("quota")?,
            home: row.get("home")?,
            last_login: row.get("last_login")?,
        })
    }
}
