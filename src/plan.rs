//! Plan builder — synthesises the aggregation statement for one (config, window).
//!
//! The builder takes the typed [`ColumnPlan`] from the schema inspector and
//! renders a single parameterised `INSERT … SELECT … GROUP BY … ON CONFLICT`
//! statement. Identifiers come exclusively from catalog introspection and
//! are always quoted; the window bounds are bound parameters (`$1`, `$2`,
//! epoch seconds); the interval literal is taken from trusted configuration.
//!
//! Positional agreement is structural: the INSERT column list and the
//! SELECT expression list are built from the same iteration, and the
//! dimension order used in GROUP BY is the same `Vec` used in the conflict
//! target.

use crate::error::PgRollupError;
use crate::inspect::{ColumnPlan, TIMESTAMP_COLUMN};

/// Quote a single SQL identifier.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified name (`schema.table` or `table`).
pub fn quote_qualified(name: &str) -> String {
    match name.split_once('.') {
        Some((schema, table)) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(name),
    }
}

/// Split a qualified name into `(schema, name)`, defaulting to `public`.
///
/// Rejects empty parts and names with more than one dot.
pub fn parse_qualified_name(name: &str) -> Result<(String, String), PgRollupError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(PgRollupError::InvalidArgument("empty table name".into()));
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    match parts.as_slice() {
        [table] => Ok(("public".to_string(), table.to_string())),
        [schema, table] if !schema.is_empty() && !table.is_empty() => {
            Ok((schema.to_string(), table.to_string()))
        }
        _ => Err(PgRollupError::InvalidArgument(format!(
            "malformed table name: {}",
            name
        ))),
    }
}

/// The fully derived plan for one run.
#[derive(Debug, Clone)]
pub struct RollupPlan {
    /// Qualified source table.
    pub source: String,
    /// Qualified target table.
    pub target: String,
    /// Interval literal from trusted configuration, e.g. `01:00:00`.
    pub interval_literal: String,
    /// Column projection derived from introspection.
    pub columns: ColumnPlan,
}

impl RollupPlan {
    /// Render the parameterised aggregation statement.
    ///
    /// `$1` and `$2` are the window bounds as Unix-epoch seconds
    /// (`double precision`), compared half-open: `ts >= $1 AND ts < $2`.
    pub fn render(&self) -> String {
        let ts = quote_identifier(TIMESTAMP_COLUMN);
        let bucket_expr = format!(
            "silver.time_bucket(INTERVAL '{}', s.{})",
            self.interval_literal.replace('\'', "''"),
            ts,
        );

        // INSERT columns and SELECT expressions are built pairwise so the
        // positional agreement cannot drift.
        let mut insert_cols: Vec<String> = Vec::new();
        let mut select_exprs: Vec<String> = Vec::new();

        insert_cols.push(ts.clone());
        select_exprs.push(bucket_expr.clone());

        for dim in &self.columns.dimensions {
            let q = quote_identifier(dim);
            insert_cols.push(q.clone());
            select_exprs.push(format!("s.{}", q));
        }

        for num in &self.columns.numeric {
            let q = quote_identifier(num);
            for (prefix, agg) in [("min_", "MIN"), ("max_", "MAX"), ("avg_", "AVG")] {
                insert_cols.push(quote_identifier(&format!("{}{}", prefix, num)));
                select_exprs.push(format!("{}(s.{})", agg, q));
            }
        }

        for json_col in &self.columns.json {
            let q = quote_identifier(json_col);
            insert_cols.push(q.clone());
            select_exprs.push(format!("array_agg(s.{})", q));
        }

        for other in &self.columns.other {
            let q = quote_identifier(other);
            insert_cols.push(q.clone());
            select_exprs.push(format!("MODE() WITHIN GROUP (ORDER BY s.{})", q));
        }

        insert_cols.push(quote_identifier("rollup_count"));
        select_exprs.push("COUNT(*)".to_string());
        insert_cols.push(quote_identifier("last_updated_at"));
        select_exprs.push("now()".to_string());

        // GROUP BY and the conflict target share the dimension Vec, so the
        // ordering is identical by construction.
        let mut group_by: Vec<String> = vec![bucket_expr];
        let mut key_cols: Vec<String> = vec![ts];
        for dim in &self.columns.dimensions {
            let q = quote_identifier(dim);
            group_by.push(format!("s.{}", q));
            key_cols.push(q);
        }

        let update_cols: Vec<String> = insert_cols
            .iter()
            .filter(|c| !key_cols.contains(c))
            .cloned()
            .collect();

        format!(
            "INSERT INTO {target} ({insert_cols})\n\
             SELECT {select_exprs}\n\
             FROM {source} s\n\
             WHERE s.{ts} >= to_timestamp($1) AND s.{ts} < to_timestamp($2)\n\
             GROUP BY {group_by}\n\
             {conflict}",
            target = quote_qualified(&self.target),
            insert_cols = insert_cols.join(", "),
            select_exprs = select_exprs.join(", "),
            source = quote_qualified(&self.source),
            ts = quote_identifier(TIMESTAMP_COLUMN),
            group_by = group_by.join(", "),
            conflict = conflict_clause(&key_cols, &update_cols),
        )
    }
}

/// Render the `ON CONFLICT` clause for the given key and non-key columns.
///
/// With nothing to update the action degrades to `DO NOTHING`.
fn conflict_clause(key_cols: &[String], update_cols: &[String]) -> String {
    if update_cols.is_empty() {
        return format!("ON CONFLICT ({}) DO NOTHING", key_cols.join(", "));
    }
    let assignments: Vec<String> = update_cols
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    format!(
        "ON CONFLICT ({}) DO UPDATE SET {}",
        key_cols.join(", "),
        assignments.join(", "),
    )
}
