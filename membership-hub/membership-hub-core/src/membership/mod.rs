//! Group memberships.
//!
//! A membership relates an account to a backend group with a role. Every
//! query accepts accounts and groups either by their external identifier
//! (uid/gid) or by their internal id; the internal form never joins the
//! account or group tables.

mod query;

use crate::account::{self, Account, AccountStore};
use crate::config::MembershipConfig;
use crate::db::{self, Database};
use crate::error::{self as errors, Error, Result};
use crate::group::{self, BackendGroup, GroupStore};
use query::{col, Col, Condition, Delete, Select, Table};
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use rusqlite::{params, params_from_iter, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) const TABLE: &str = "memberships";

const M_ACCOUNT_ID: Col = col(Table::Memberships, "account_id");
const M_GROUP_ID: Col = col(Table::Memberships, "backend_group_id");
const M_TYPE: Col = col(Table::Memberships, "membership_type");
const A_ID: Col = col(Table::Accounts, "id");
const A_USER_ID: Col = col(Table::Accounts, "user_id");
const A_LOWER_USER_ID: Col = col(Table::Accounts, "lower_user_id");
const A_DISPLAY_NAME: Col = col(Table::Accounts, "display_name");
const A_EMAIL: Col = col(Table::Accounts, "email");
const G_ID: Col = col(Table::Groups, "id");
const G_GROUP_ID: Col = col(Table::Groups, "group_id");
const T_ACCOUNT_ID: Col = col(Table::Terms, "account_id");
const T_TERM: Col = col(Table::Terms, "term");

/// Role an account holds in a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipType {
    User,
    Admin,
}

impl MembershipType {
    pub const ALL: [MembershipType; 2] = [MembershipType::User, MembershipType::Admin];

    pub fn as_i64(self) -> i64 {
        match self {
            MembershipType::User => 0,
            MembershipType::Admin => 1,
        }
    }
}

impl TryFrom<i64> for MembershipType {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(MembershipType::User),
            1 => Ok(MembershipType::Admin),
            other => Err(Error::InvalidMembershipType(other)),
        }
    }
}

impl From<MembershipType> for Value {
    fn from(kind: MembershipType) -> Self {
        Value::Integer(kind.as_i64())
    }
}

impl ToSql for MembershipType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl fmt::Display for MembershipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipType::User => f.write_str("user"),
            MembershipType::Admin => f.write_str("admin"),
        }
    }
}

/// An account addressed by external uid or by internal id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccountRef {
    Uid(String),
    Id(i64),
}

impl AccountRef {
    pub fn uid(uid: impl Into<String>) -> Self {
        AccountRef::Uid(uid.into())
    }

    pub fn id(id: i64) -> Self {
        AccountRef::Id(id)
    }

    /// Restrict a select over memberships to this account.
    fn apply(&self, select: Select) -> Select {
        match self {
            AccountRef::Id(id) => select.filter(Condition::eq(M_ACCOUNT_ID, *id)),
            AccountRef::Uid(uid) => select
                .inner_join(Table::Accounts, A_ID, M_ACCOUNT_ID)
                .filter(Condition::eq(A_USER_ID, uid.clone())),
        }
    }

    fn condition(&self) -> Condition {
        match self {
            AccountRef::Id(id) => Condition::eq(M_ACCOUNT_ID, *id),
            AccountRef::Uid(uid) => Condition::IdLookup {
                col: M_ACCOUNT_ID,
                table: Table::Accounts,
                key: "user_id",
                value: Value::Text(uid.clone()),
            },
        }
    }
}

impl From<&Account> for AccountRef {
    fn from(account: &Account) -> Self {
        AccountRef::Id(account.id)
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Uid(uid) => write!(f, "uid:{uid}"),
            AccountRef::Id(id) => write!(f, "account#{id}"),
        }
    }
}

/// A backend group addressed by external gid or by internal id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupRef {
    Gid(String),
    Id(i64),
}

impl GroupRef {
    pub fn gid(gid: impl Into<String>) -> Self {
        GroupRef::Gid(gid.into())
    }

    pub fn id(id: i64) -> Self {
        GroupRef::Id(id)
    }

    fn apply(&self, select: Select) -> Select {
        match self {
            GroupRef::Id(id) => select.filter(Condition::eq(M_GROUP_ID, *id)),
            GroupRef::Gid(gid) => select
                .inner_join(Table::Groups, G_ID, M_GROUP_ID)
                .filter(Condition::eq(G_GROUP_ID, gid.clone())),
        }
    }

    fn condition(&self) -> Condition {
        match self {
            GroupRef::Id(id) => Condition::eq(M_GROUP_ID, *id),
            GroupRef::Gid(gid) => Condition::IdLookup {
                col: M_GROUP_ID,
                table: Table::Groups,
                key: "group_id",
                value: Value::Text(gid.clone()),
            },
        }
    }
}

impl From<&BackendGroup> for GroupRef {
    fn from(group: &BackendGroup) -> Self {
        GroupRef::Id(group.id)
    }
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupRef::Gid(gid) => write!(f, "gid:{gid}"),
            GroupRef::Id(id) => write!(f, "group#{id}"),
        }
    }
}

/// Queries and mutations on the membership relation.
#[derive(Clone, Debug)]
pub struct MembershipStore {
    db: Database,
    config: MembershipConfig,
    accounts: AccountStore,
    groups: GroupStore,
}

impl MembershipStore {
    pub fn new(
        db: Database,
        config: MembershipConfig,
        accounts: AccountStore,
        groups: GroupStore,
    ) -> Self {
        Self {
            db,
            config,
            accounts,
            groups,
        }
    }

    /// Build all three stores over one database.
    pub fn open(db: Database, config: MembershipConfig) -> Self {
        let accounts = AccountStore::new(db.clone());
        let groups = GroupStore::new(db.clone());
        Self::new(db, config, accounts, groups)
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Groups in which `account` holds `role`, ordered by group id.
    pub fn groups_for_account(
        &self,
        account: &AccountRef,
        role: MembershipType,
    ) -> Result<Vec<BackendGroup>> {
        let select = Select::from(Table::Memberships)
            .columns(Table::Groups, &group::COLUMNS)
            .inner_join(Table::Groups, G_ID, M_GROUP_ID);
        let select = account
            .apply(select)
            .filter(Condition::eq(M_TYPE, role))
            .order_by(G_ID);
        self.fetch(&select, GroupStore::map_row)
    }

    /// Accounts holding `role` in `group`, or in any group when `group` is
    /// `None`. Each account appears once, ordered by account id.
    pub fn accounts_for_group(
        &self,
        group: Option<&GroupRef>,
        role: MembershipType,
    ) -> Result<Vec<Account>> {
        let mut select = Select::from(Table::Memberships)
            .distinct()
            .columns(Table::Accounts, &account::COLUMNS)
            .inner_join(Table::Accounts, A_ID, M_ACCOUNT_ID);
        if let Some(group) = group {
            select = group.apply(select);
        }
        let select = select.filter(Condition::eq(M_TYPE, role)).order_by(A_ID);
        self.fetch(&select, AccountStore::map_row)
    }

    /// Whether `account` holds `role` in `group`.
    pub fn is_member(
        &self,
        account: &AccountRef,
        group: &GroupRef,
        role: MembershipType,
    ) -> Result<bool> {
        let select = group
            .apply(account.apply(Select::from(Table::Memberships)))
            .filter(Condition::eq(M_TYPE, role))
            .page(Some(1), None);
        let (sql, values) = select.build();
        tracing::debug!(%sql, %account, %group, %role, "membership check");
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.exists(params_from_iter(values))?)
    }

    /// USER members of `group` matching `pattern`, ordered by display name.
    ///
    /// The pattern is matched against the lowercased uid, the display name,
    /// the email and the account's search terms, case-insensitively. With
    /// medial search enabled it may occur anywhere, otherwise only as a
    /// prefix. An empty pattern returns every member.
    pub fn search(
        &self,
        group: &GroupRef,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Account>> {
        let select = self.search_select(group, pattern, limit, offset);
        self.fetch(&select, AccountStore::map_row)
    }

    /// Number of accounts `search` returns for the same arguments, computed
    /// by materialising the result.
    pub fn count_members(
        &self,
        group: &GroupRef,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<usize> {
        Ok(self.search(group, pattern, limit, offset)?.len())
    }

    /// Same answer as `count_members`, computed with `COUNT(*)`.
    pub fn count_members_aggregate(
        &self,
        group: &GroupRef,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<usize> {
        let (sql, values) = self
            .search_select(group, pattern, limit, offset)
            .build_count();
        tracing::debug!(%sql, "membership count");
        let conn = self.db.conn();
        let count: usize = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    fn search_select(
        &self,
        group: &GroupRef,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Select {
        let select = Select::from(Table::Accounts)
            .distinct()
            .columns(Table::Accounts, &account::COLUMNS)
            .inner_join(Table::Memberships, M_ACCOUNT_ID, A_ID)
            .left_join(Table::Terms, T_ACCOUNT_ID, A_ID);
        let mut select = group
            .apply(select)
            .filter(Condition::eq(M_TYPE, MembershipType::User));

        if !pattern.is_empty() {
            let medial = self.config.enable_medial_search;
            let lowered = db::like_pattern(&pattern.to_lowercase(), medial);
            // uid and terms are stored lowercased
            select = select.filter(Condition::AnyOf(vec![
                Condition::like(A_LOWER_USER_ID, lowered.clone()),
                Condition::like_lower(A_DISPLAY_NAME, lowered.clone()),
                Condition::like_lower(A_EMAIL, lowered.clone()),
                Condition::like(T_TERM, lowered),
            ]));
        }

        select
            .order_by(A_DISPLAY_NAME)
            .order_by(A_ID)
            .page(limit, offset)
    }

    fn fetch<T, F>(&self, select: &Select, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let (sql, values) = select.build();
        tracing::debug!(%sql, params = values.len(), "membership query");
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Insert a membership row. Returns `false` when the row already exists;
    /// every other failure is returned as an error.
    pub fn add_membership(
        &self,
        account_id: i64,
        group_id: i64,
        role: MembershipType,
    ) -> Result<bool> {
        let conn = self.db.conn();
        let inserted = conn.execute(
            "INSERT INTO memberships (backend_group_id, account_id, membership_type) VALUES (?1, ?2, ?3)",
            params![group_id, account_id, role],
        );
        match inserted {
            Ok(_) => {
                tracing::debug!(account_id, group_id, %role, "membership added");
                Ok(true)
            }
            Err(err) if errors::is_unique_violation(&err) => {
                tracing::warn!(account_id, group_id, %role, "membership already exists");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every membership of `group`, whatever the role.
    pub fn remove_memberships_for_group(&self, group: &GroupRef) -> Result<bool> {
        self.remove(Some(group), None, &MembershipType::ALL)
    }

    /// Delete every membership of `account`, whatever the role.
    pub fn remove_memberships_for_account(&self, account: &AccountRef) -> Result<bool> {
        self.remove(None, Some(account), &MembershipType::ALL)
    }

    /// Delete the single `(account, group, role)` row. Absent rows are not an
    /// error.
    pub fn remove_role(
        &self,
        account: &AccountRef,
        group: &GroupRef,
        role: MembershipType,
    ) -> Result<bool> {
        self.remove(Some(group), Some(account), &[role])
    }

    /// Delete memberships with one of `roles` for the given group and/or
    /// account. Refuses (`false`) to run without either predicate.
    pub fn remove(
        &self,
        group: Option<&GroupRef>,
        account: Option<&AccountRef>,
        roles: &[MembershipType],
    ) -> Result<bool> {
        if group.is_none() && account.is_none() {
            return Ok(false);
        }
        let mut delete = Delete::from(Table::Memberships);
        if let Some(group) = group {
            delete = delete.filter(group.condition());
        }
        if let Some(account) = account {
            delete = delete.filter(account.condition());
        }
        let delete = delete.filter(Condition::is_in(M_TYPE, roles.iter().copied()));
        let (sql, values) = delete.build();
        let conn = self.db.conn();
        let removed = conn.execute(&sql, params_from_iter(values))?;
        tracing::debug!(%sql, removed, "memberships removed");
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Named entry points
    // ---------------------------------------------------------------------

    pub fn user_backend_groups(&self, uid: &str) -> Result<Vec<BackendGroup>> {
        self.groups_for_account(&AccountRef::uid(uid), MembershipType::User)
    }

    pub fn user_backend_groups_by_id(&self, account_id: i64) -> Result<Vec<BackendGroup>> {
        self.groups_for_account(&AccountRef::id(account_id), MembershipType::User)
    }

    pub fn admin_backend_groups(&self, uid: &str) -> Result<Vec<BackendGroup>> {
        self.groups_for_account(&AccountRef::uid(uid), MembershipType::Admin)
    }

    pub fn group_user_accounts(&self, gid: &str) -> Result<Vec<Account>> {
        self.accounts_for_group(Some(&GroupRef::gid(gid)), MembershipType::User)
    }

    pub fn group_user_accounts_by_id(&self, group_id: i64) -> Result<Vec<Account>> {
        self.accounts_for_group(Some(&GroupRef::id(group_id)), MembershipType::User)
    }

    pub fn group_admin_accounts(&self, gid: &str) -> Result<Vec<Account>> {
        self.accounts_for_group(Some(&GroupRef::gid(gid)), MembershipType::Admin)
    }

    /// Every account that administers at least one group.
    pub fn admin_accounts(&self) -> Result<Vec<Account>> {
        self.accounts_for_group(None, MembershipType::Admin)
    }

    pub fn is_group_user(&self, uid: &str, gid: &str) -> Result<bool> {
        self.is_member(&AccountRef::uid(uid), &GroupRef::gid(gid), MembershipType::User)
    }

    pub fn is_group_user_by_id(&self, account_id: i64, group_id: i64) -> Result<bool> {
        self.is_member(
            &AccountRef::id(account_id),
            &GroupRef::id(group_id),
            MembershipType::User,
        )
    }

    pub fn is_group_admin(&self, uid: &str, gid: &str) -> Result<bool> {
        self.is_member(&AccountRef::uid(uid), &GroupRef::gid(gid), MembershipType::Admin)
    }

    pub fn find(
        &self,
        gid: &str,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Account>> {
        self.search(&GroupRef::gid(gid), pattern, limit, offset)
    }

    pub fn find_by_id(
        &self,
        group_id: i64,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Account>> {
        self.search(&GroupRef::id(group_id), pattern, limit, offset)
    }

    pub fn add_group_user(&self, account_id: i64, group_id: i64) -> Result<bool> {
        self.add_membership(account_id, group_id, MembershipType::User)
    }

    pub fn add_group_admin(&self, account_id: i64, group_id: i64) -> Result<bool> {
        self.add_membership(account_id, group_id, MembershipType::Admin)
    }

    pub fn remove_group_user(&self, uid: &str, gid: &str) -> Result<bool> {
        self.remove_role(&AccountRef::uid(uid), &GroupRef::gid(gid), MembershipType::User)
    }

    pub fn remove_group_admin(&self, uid: &str, gid: &str) -> Result<bool> {
        self.remove_role(&AccountRef::uid(uid), &GroupRef::gid(gid), MembershipType::Admin)
    }

    pub fn remove_group_members(&self, gid: &str) -> Result<bool> {
        self.remove_memberships_for_group(&GroupRef::gid(gid))
    }

    pub fn remove_memberships(&self, uid: &str) -> Result<bool> {
        self.remove_memberships_for_account(&AccountRef::uid(uid))
    }
}
