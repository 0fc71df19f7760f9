//! Parametrized SQL construction.
//!
//! Builders return a [`Query`]: the SQL text with `$n` placeholders plus the
//! parameter list, ready for the gateway to bind and execute. Building is
//! pure so every query shape is unit-testable without a database.

use tilemud_core::Vec2;

/// One bound query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    I64(i64),
    I32(i32),
    F64(f64),
    Bool(bool),
    Str(String),
    Null,
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::I64(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// An equality condition in a `WHERE` conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub column: String,
    pub param: SqlParam,
}

impl WhereClause {
    #[must_use]
    pub fn eq(column: &str, param: impl Into<SqlParam>) -> Self {
        Self {
            column: column.to_string(),
            param: param.into(),
        }
    }
}

/// Ordering and paging options for selects.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Column to order by, ascending.
    pub order_by: Option<String>,
    pub limit: Option<i64>,
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Query {
    /// `SELECT * FROM table WHERE a = $1 AND b = $2 …`.
    #[must_use]
    pub fn select(table: &str, filters: &[WhereClause], options: &SelectOptions) -> Self {
        let mut sql = format!("SELECT * FROM {table}");
        let mut params = Vec::with_capacity(filters.len());
        for (i, clause) in filters.iter().enumerate() {
            let keyword = if i == 0 { " WHERE" } else { " AND" };
            sql.push_str(&format!("{keyword} {} = ${}", clause.column, i + 1));
            params.push(clause.param.clone());
        }
        if let Some(order_by) = &options.order_by {
            sql.push_str(&format!(" ORDER BY {order_by}"));
        }
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        Self { sql, params }
    }

    /// `INSERT … RETURNING id`. Column order is the caller's submission
    /// order; the registry relies on that for key adoption.
    #[must_use]
    pub fn insert(table: &str, columns: Vec<(String, SqlParam)>) -> Self {
        let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING id",
            names.join(", "),
            placeholders.join(", ")
        );
        let params = columns.into_iter().map(|(_, param)| param).collect();
        Self { sql, params }
    }

    /// `UPDATE … SET a = $1 … WHERE id = $n`.
    #[must_use]
    pub fn update_by_id(table: &str, id: i64, columns: Vec<(String, SqlParam)>) -> Self {
        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("{name} = ${}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ${}",
            assignments.join(", "),
            columns.len() + 1
        );
        let mut params: Vec<SqlParam> = columns.into_iter().map(|(_, param)| param).collect();
        params.push(SqlParam::I64(id));
        Self { sql, params }
    }

    /// `DELETE FROM table WHERE id = $1`.
    #[must_use]
    pub fn delete_by_id(table: &str, id: i64) -> Self {
        Self {
            sql: format!("DELETE FROM {table} WHERE id = $1"),
            params: vec![SqlParam::I64(id)],
        }
    }

    /// Positional select over a half-open tile rectangle:
    /// `location_id = $1 AND x ∈ [start.x, end.x) AND y ∈ [start.y, end.y)`.
    #[must_use]
    pub fn select_in_rect(table: &str, location_id: i64, start: Vec2, end: Vec2) -> Self {
        Self {
            sql: format!(
                "SELECT * FROM {table} WHERE location_id = $1 \
                 AND x >= $2 AND x < $3 AND y >= $4 AND y < $5"
            ),
            params: vec![
                SqlParam::I64(location_id),
                SqlParam::I32(start.x),
                SqlParam::I32(end.x),
                SqlParam::I32(start.y),
                SqlParam::I32(end.y),
            ],
        }
    }

    /// Select for shaped entities: any row whose footprint (anchor position
    /// plus shape-cell offsets from the child table) touches the rectangle.
    /// Matching rows are fetched whole, not cell by cell.
    #[must_use]
    pub fn select_shaped_in_rect(
        table: &str,
        shape_table: &str,
        fk_column: &str,
        location_id: i64,
        start: Vec2,
        end: Vec2,
    ) -> Self {
        Self {
            sql: format!(
                "SELECT DISTINCT e.* FROM {table} e \
                 JOIN {shape_table} s ON s.{fk_column} = e.id \
                 WHERE e.location_id = $1 \
                 AND e.x + s.x >= $2 AND e.x + s.x < $3 \
                 AND e.y + s.y >= $4 AND e.y + s.y < $5"
            ),
            params: vec![
                SqlParam::I64(location_id),
                SqlParam::I32(start.x),
                SqlParam::I32(end.x),
                SqlParam::I32(start.y),
                SqlParam::I32(end.y),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_without_filters() {
        let q = Query::select("locations", &[], &SelectOptions::default());
        assert_eq!(q.sql, "SELECT * FROM locations");
        assert!(q.params.is_empty());
    }

    #[test]
    fn select_with_filters_and_options() {
        let q = Query::select(
            "users",
            &[
                WhereClause::eq("account_id", 7_i64),
                WhereClause::eq("name", "Luka"),
            ],
            &SelectOptions {
                order_by: Some("id".into()),
                limit: Some(10),
            },
        );
        assert_eq!(
            q.sql,
            "SELECT * FROM users WHERE account_id = $1 AND name = $2 ORDER BY id LIMIT 10"
        );
        assert_eq!(q.params[1], SqlParam::Str("Luka".into()));
    }

    #[test]
    fn insert_preserves_column_order_and_returns_id() {
        let q = Query::insert(
            "accounts",
            vec![
                ("name".into(), SqlParam::Str("Luka".into())),
                ("mail".into(), SqlParam::Str("a@b.c".into())),
            ],
        );
        assert_eq!(
            q.sql,
            "INSERT INTO accounts (name, mail) VALUES ($1, $2) RETURNING id"
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn update_appends_id_parameter_last() {
        let q = Query::update_by_id(
            "users",
            42,
            vec![
                ("x".into(), SqlParam::I32(6)),
                ("y".into(), SqlParam::I32(7)),
            ],
        );
        assert_eq!(q.sql, "UPDATE users SET x = $1, y = $2 WHERE id = $3");
        assert_eq!(q.params[2], SqlParam::I64(42));
    }

    #[test]
    fn delete_by_id_binds_id() {
        let q = Query::delete_by_id("messages", 9);
        assert_eq!(q.sql, "DELETE FROM messages WHERE id = $1");
        assert_eq!(q.params, vec![SqlParam::I64(9)]);
    }

    #[test]
    fn rect_select_is_half_open() {
        let q = Query::select_in_rect("tiles", 1, Vec2::new(16, 32), Vec2::new(32, 64));
        assert_eq!(
            q.sql,
            "SELECT * FROM tiles WHERE location_id = $1 \
             AND x >= $2 AND x < $3 AND y >= $4 AND y < $5"
        );
        assert_eq!(q.params[2], SqlParam::I32(32));
    }

    #[test]
    fn shaped_rect_select_joins_shape_table() {
        let q = Query::select_shaped_in_rect("items", "item_shapes", "item_id", 1, Vec2::ZERO, Vec2::new(16, 32));
        assert!(q.sql.starts_with("SELECT DISTINCT e.* FROM items e JOIN item_shapes s"));
        assert!(q.sql.contains("e.x + s.x >= $2"));
        assert_eq!(q.params.len(), 5);
    }
}
