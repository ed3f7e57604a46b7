use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{params_from_iter, Connection};

pub mod partners_db_operations;
pub mod posts_db_operations;
pub mod push_db_operations;
pub mod reports_db_operations;
pub mod settings_db_operations;
pub mod tags_db_operations;
pub mod users_db_operations;

/// Current time as stored in every `*_at` column.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

pub fn like_pattern(search: &str) -> String {
    format!("%{}%", search.trim())
}

/// Accumulates `WHERE` clauses with anonymous `?` placeholders and their values.
#[derive(Default)]
pub struct SqlFilter {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: ToSql + 'static>(&mut self, clause: &str, value: T) {
        self.clauses.push(clause.to_string());
        self.values.push(Box::new(value));
    }

    /// Adds a clause that binds the same value to several placeholders.
    pub fn push_repeated<T: ToSql + Clone + 'static>(&mut self, clause: &str, value: T, times: usize) {
        self.clauses.push(clause.to_string());
        for _ in 0..times {
            self.values.push(Box::new(value.clone()));
        }
    }

    /// `col IN (?, ?, ...)`; an empty list adds nothing.
    pub fn push_in(&mut self, column: &str, values: &[String]) {
        if values.is_empty() {
            return;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.clauses.push(format!("{} IN ({})", column, placeholders));
        for value in values {
            self.values.push(Box::new(value.clone()));
        }
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn count(&self, conn: &Connection, from: &str) -> rusqlite::Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", from, self.where_sql());
        conn.query_row(&sql, params_from_iter(self.values.iter()), |row| row.get(0))
    }

    /// Values followed by `extra` (usually LIMIT/OFFSET) in binding order.
    pub fn params_with<'a>(&'a self, extra: &'a [i64]) -> Vec<&'a dyn ToSql> {
        let mut params: Vec<&'a dyn ToSql> = self.values.iter().map(|v| v.as_ref()).collect();
        for value in extra {
            params.push(value);
        }
        params
    }
}

/// Builds `UPDATE <table> SET a = ?, b = ? WHERE id = ?` from the fields that were provided.
pub struct SqlUpdate {
    table: &'static str,
    assignments: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl SqlUpdate {
    pub fn new(table: &'static str) -> Self {
        SqlUpdate { table, assignments: Vec::new(), values: Vec::new() }
    }

    pub fn set<T: ToSql + 'static>(&mut self, column: &str, value: T) -> &mut Self {
        self.assignments.push(format!("{} = ?", column));
        self.values.push(Box::new(value));
        self
    }

    pub fn set_opt<T: ToSql + 'static>(&mut self, column: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.set(column, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Runs the update against the row with `id`. With nothing to set it only checks existence.
    pub fn execute(&self, conn: &Connection, id: i64) -> rusqlite::Result<usize> {
        self.execute_where(conn, id, None)
    }

    /// Like [`SqlUpdate::execute`], but only touches the row while `condition` holds.
    pub fn execute_where(&self, conn: &Connection, id: i64, condition: Option<&str>) -> rusqlite::Result<usize> {
        let guard = condition.map(|c| format!(" AND {}", c)).unwrap_or_default();
        if self.is_empty() {
            let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1{}", self.table, guard);
            let count: i64 = conn.query_row(&sql, [id], |row| row.get(0))?;
            return Ok(count as usize);
        }
        let sql = format!("UPDATE {} SET {} WHERE id = ?{}", self.table, self.assignments.join(", "), guard);
        let mut params: Vec<&dyn ToSql> = self.values.iter().map(|v| v.as_ref()).collect();
        params.push(&id);
        conn.execute(&sql, params.as_slice())
    }
}

/// Splits a comma separated column into trimmed, non-empty parts.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
