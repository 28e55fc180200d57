//! Backend group persistence.

use crate::db::{self, Database, LIKE_ESCAPE, LOWER_FN};
use crate::error::Result;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const TABLE: &str = "backend_groups";

pub(crate) const COLUMNS: [&str; 4] = ["id", "group_id", "display_name", "backend"];

/// A group as known to one group backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendGroup {
    pub id: i64,
    pub group_id: String,
    pub display_name: Option<String>,
    pub backend: String,
}

#[derive(Clone, Debug, Default)]
pub struct NewBackendGroup {
    pub group_id: String,
    pub display_name: Option<String>,
    pub backend: String,
}

impl NewBackendGroup {
    pub fn new(group_id: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            display_name: None,
            backend: backend.into(),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupSearchField {
    GroupId,
    DisplayName,
}

impl GroupSearchField {
    fn column(self) -> &'static str {
        match self {
            GroupSearchField::GroupId => "group_id",
            GroupSearchField::DisplayName => "display_name",
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupStore {
    db: Database,
}

impl GroupStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, new: NewBackendGroup) -> Result<BackendGroup> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO backend_groups (group_id, display_name, backend) VALUES (?1, ?2, ?3)",
            params![new.group_id, new.display_name, new.backend],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, group_id = %new.group_id, "backend group inserted");
        Ok(BackendGroup {
            id,
            group_id: new.group_id,
            display_name: new.display_name,
            backend: new.backend,
        })
    }

    /// Backend group for `gid`, or `None` when it does not exist.
    pub fn get_group(&self, gid: &str) -> Result<Option<BackendGroup>> {
        let sql = format!("SELECT {} FROM {TABLE} WHERE group_id = ?1", COLUMNS.join(", "));
        let conn = self.db.conn();
        Ok(conn.query_row(&sql, [gid], Self::map_row).optional()?)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<BackendGroup>> {
        let sql = format!("SELECT {} FROM {TABLE} WHERE id = ?1", COLUMNS.join(", "));
        let conn = self.db.conn();
        Ok(conn.query_row(&sql, [id], Self::map_row).optional()?)
    }

    /// Delete a group. Memberships must be removed first; otherwise the
    /// foreign key rejects the delete and the error is returned.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.db.conn();
        let deleted = conn.execute("DELETE FROM backend_groups WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    pub fn search(
        &self,
        field: GroupSearchField,
        pattern: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<BackendGroup>> {
        let column = field.column();
        let sql = format!(
            "SELECT {cols} FROM {TABLE} WHERE {LOWER_FN}({column}) LIKE ?1 ESCAPE '{LIKE_ESCAPE}' ORDER BY {column}, id{page}",
            cols = COLUMNS.join(", "),
            page = db::page_clause(limit, offset),
        );
        let conn = self.db.conn();
        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map([db::like_pattern(&pattern.to_lowercase(), true)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    pub fn map_row(row: &Row<'_>) -> rusqlite::Result<BackendGroup> {
        Ok(BackendGroup {
            id: row.get("id")?,
            group_id: row.get("group_id")?,
            display_name: row.get("display_name")?,
            backend: row.get("backend")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GroupStore {
        GroupStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn get_group_by_gid() {
        let groups = store();
        let inserted = groups
            .insert(NewBackendGroup::new("staff", "Database").display_name("Staff"))
            .unwrap();
        assert_eq!(groups.get_group("staff").unwrap(), Some(inserted.clone()));
        assert_eq!(groups.get_by_id(inserted.id).unwrap(), Some(inserted));
        assert!(groups.get_group("Staff").unwrap().is_none());
    }

    #[test]
    fn duplicate_gid_is_rejected() {
        let groups = store();
        groups.insert(NewBackendGroup::new("staff", "Database")).unwrap();
        assert!(groups
            .insert(NewBackendGroup::new("staff", "Other"))
            .unwrap_err()
            .is_unique_violation());
    }

    #[test]
    fn delete_reports_whether_a_row_went_away() {
        let groups = store();
        let g = groups.insert(NewBackendGroup::new("staff", "Database")).unwrap();
        assert!(groups.delete(g.id).unwrap());
        assert!(!groups.delete(g.id).unwrap());
        assert!(groups.get_group("staff").unwrap().is_none());
    }

    #[test]
    fn search_by_display_name() {
        let groups = store();
        for (gid, name) in [("g1", "Sales EMEA"), ("g2", "Engineering"), ("g3", "sales us")] {
            groups
                .insert(NewBackendGroup::new(gid, "Database").display_name(name))
                .unwrap();
        }
        let found = groups
            .search(GroupSearchField::DisplayName, "SALES", None, None)
            .unwrap();
        let gids: Vec<_> = found.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(gids, vec!["g1", "g3"]);

        let limited = groups
            .search(GroupSearchField::GroupId, "g", Some(2), None)
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].group_id, "g1");

        groups
            .insert(NewBackendGroup::new("g4", "Database").display_name("Équipe"))
            .unwrap();
        let found = groups
            .search(GroupSearchField::DisplayName, "équipe", None, None)
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
