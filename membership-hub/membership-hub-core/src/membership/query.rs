//! Small typed SQL builder for the membership queries.
//!
//! Tables carry a fixed alias, columns are qualified through their table and
//! every value is bound as a parameter. Nothing here concatenates caller
//! input into SQL text.

use crate::db::{self, LIKE_ESCAPE, LOWER_FN};
use rusqlite::types::Value;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Table {
    Memberships,
    Accounts,
    Groups,
    Terms,
}

impl Table {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Table::Memberships => super::TABLE,
            Table::Accounts => crate::account::TABLE,
            Table::Groups => crate::group::TABLE,
            Table::Terms => crate::account::TERMS_TABLE,
        }
    }

    pub(crate) fn alias(self) -> &'static str {
        match self {
            Table::Memberships => "m",
            Table::Accounts => "a",
            Table::Groups => "g",
            Table::Terms => "t",
        }
    }
}

/// Column of a known table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Col {
    table: Table,
    name: &'static str,
}

pub(crate) const fn col(table: Table, name: &'static str) -> Col {
    Col { table, name }
}

/// DELETE statements cannot use aliases, so their columns are written bare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Qualify {
    Alias,
    Bare,
}

impl Col {
    fn write(&self, sql: &mut String, qualify: Qualify) {
        match qualify {
            Qualify::Alias => {
                let _ = write!(sql, "{}.{}", self.table.alias(), self.name);
            }
            Qualify::Bare => sql.push_str(self.name),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Condition {
    Eq(Col, Value),
    In(Col, Vec<Value>),
    /// `LIKE` with the crate-wide escape character; the operand must
    /// already be escaped.
    Like(Col, Value),
    /// `LIKE` against the Unicode-lowercased column; the operand must be
    /// lowercased and escaped.
    LikeLower(Col, Value),
    AnyOf(Vec<Condition>),
    /// `col IN (SELECT id FROM table WHERE key = ?)`, resolving an external
    /// identifier without a join.
    IdLookup {
        col: Col,
        table: Table,
        key: &'static str,
        value: Value,
    },
}

impl Condition {
    pub(crate) fn eq(col: Col, value: impl Into<Value>) -> Self {
        Condition::Eq(col, value.into())
    }

    pub(crate) fn is_in<V: Into<Value>>(col: Col, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In(col, values.into_iter().map(Into::into).collect())
    }

    pub(crate) fn like(col: Col, operand: String) -> Self {
        Condition::Like(col, Value::Text(operand))
    }

    pub(crate) fn like_lower(col: Col, operand: String) -> Self {
        Condition::LikeLower(col, Value::Text(operand))
    }

    fn render(&self, sql: &mut String, params: &mut Vec<Value>, qualify: Qualify) {
        match self {
            Condition::Eq(col, value) => {
                col.write(sql, qualify);
                sql.push_str(" = ?");
                params.push(value.clone());
            }
            Condition::In(col, values) => {
                if values.is_empty() {
                    sql.push_str("0");
                    return;
                }
                col.write(sql, qualify);
                sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(value.clone());
                }
                sql.push(')');
            }
            Condition::Like(col, operand) => {
                col.write(sql, qualify);
                let _ = write!(sql, " LIKE ? ESCAPE '{LIKE_ESCAPE}'");
                params.push(operand.clone());
            }
            Condition::LikeLower(col, operand) => {
                let _ = write!(sql, "{LOWER_FN}(");
                col.write(sql, qualify);
                let _ = write!(sql, ") LIKE ? ESCAPE '{LIKE_ESCAPE}'");
                params.push(operand.clone());
            }
            Condition::AnyOf(conditions) => {
                sql.push('(');
                for (i, condition) in conditions.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" OR ");
                    }
                    condition.render(sql, params, qualify);
                }
                sql.push(')');
            }
            Condition::IdLookup {
                col,
                table,
                key,
                value,
            } => {
                col.write(sql, qualify);
                let _ = write!(sql, " IN (SELECT id FROM {} WHERE {} = ?)", table.name(), key);
                params.push(value.clone());
            }
        }
    }
}

fn render_where(conditions: &[Condition], sql: &mut String, params: &mut Vec<Value>, qualify: Qualify) {
    for (i, condition) in conditions.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        condition.render(sql, params, qualify);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

#[derive(Clone, Debug)]
struct Join {
    kind: JoinKind,
    table: Table,
    left: Col,
    right: Col,
}

#[derive(Clone, Debug)]
enum Projection {
    Columns(Table, &'static [&'static str]),
    One,
}

#[derive(Clone, Debug)]
pub(crate) struct Select {
    projection: Projection,
    distinct: bool,
    from: Table,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    order_by: Vec<Col>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl Select {
    pub(crate) fn from(table: Table) -> Self {
        Self {
            projection: Projection::One,
            distinct: false,
            from: table,
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Project `columns` of `table`, each aliased to its bare name so row
    /// mappers can read them by name.
    pub(crate) fn columns(mut self, table: Table, columns: &'static [&'static str]) -> Self {
        self.projection = Projection::Columns(table, columns);
        self
    }

    pub(crate) fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub(crate) fn has_table(&self, table: Table) -> bool {
        self.from == table || self.joins.iter().any(|j| j.table == table)
    }

    /// Join `table` on `left = right`. A table already present is not joined
    /// twice.
    pub(crate) fn inner_join(self, table: Table, left: Col, right: Col) -> Self {
        self.join(JoinKind::Inner, table, left, right)
    }

    pub(crate) fn left_join(self, table: Table, left: Col, right: Col) -> Self {
        self.join(JoinKind::Left, table, left, right)
    }

    fn join(mut self, kind: JoinKind, table: Table, left: Col, right: Col) -> Self {
        if !self.has_table(table) {
            self.joins.push(Join {
                kind,
                table,
                left,
                right,
            });
        }
        self
    }

    pub(crate) fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub(crate) fn order_by(mut self, col: Col) -> Self {
        self.order_by.push(col);
        self
    }

    pub(crate) fn page(mut self, limit: Option<u32>, offset: Option<u32>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub(crate) fn build(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        match &self.projection {
            Projection::Columns(table, columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    let _ = write!(sql, "{}.{column} AS {column}", table.alias());
                }
            }
            Projection::One => sql.push('1'),
        }
        let _ = write!(sql, " FROM {} {}", self.from.name(), self.from.alias());
        for join in &self.joins {
            let kind = match join.kind {
                JoinKind::Inner => "INNER",
                JoinKind::Left => "LEFT",
            };
            let _ = write!(
                sql,
                " {kind} JOIN {} {} ON ",
                join.table.name(),
                join.table.alias()
            );
            join.left.write(&mut sql, Qualify::Alias);
            sql.push_str(" = ");
            join.right.write(&mut sql, Qualify::Alias);
        }
        render_where(&self.conditions, &mut sql, &mut params, Qualify::Alias);
        for (i, col) in self.order_by.iter().enumerate() {
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            col.write(&mut sql, Qualify::Alias);
        }
        sql.push_str(&db::page_clause(self.limit, self.offset));
        (sql, params)
    }

    /// `SELECT COUNT(*)` over the rows this query returns, paging included.
    pub(crate) fn build_count(&self) -> (String, Vec<Value>) {
        let (inner, params) = self.build();
        (format!("SELECT COUNT(*) FROM ({inner})"), params)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Delete {
    table: Table,
    conditions: Vec<Condition>,
}

impl Delete {
    pub(crate) fn from(table: Table) -> Self {
        Self {
            table,
            conditions: Vec::new(),
        }
    }

    pub(crate) fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub(crate) fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", self.table.name());
        let mut params = Vec::new();
        render_where(&self.conditions, &mut sql, &mut params, Qualify::Bare);
        (sql, params)
    }
}
