//! Schema inspector — catalog introspection and column classification.
//!
//! Given a qualified table name, returns the ordered column list with a
//! semantic class, and derives the projection sets the plan builder needs:
//! dimensions, aggregatable numerics, and pass-through non-numerics.
//!
//! The classifier is a pure function over column lists so the projection
//! gates (min/max/avg triplet on the target, reserved names and prefixes,
//! target existence for non-numerics) are testable without a database.

use std::collections::HashMap;

use pgrx::prelude::*;

use crate::error::PgRollupError;

/// Name of the bucketing column every source and target must carry.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Column names owned by the rollup machinery, never aggregated.
pub const RESERVED_COLUMNS: [&str; 2] = ["last_updated_at", "rollup_count"];

/// Prefixes that mark a column as an existing aggregate output.
pub const RESERVED_PREFIXES: [&str; 3] = ["min_", "max_", "avg_"];

/// Semantic class of a column, derived from its SQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnClass {
    Timestamp,
    Numeric,
    Json,
    Other,
}

/// One column of an introspected table.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// Formatted SQL type, e.g. `double precision`, `character varying(64)`.
    pub type_name: String,
    pub class: ColumnClass,
}

/// Classify a formatted SQL type name into its semantic class.
pub fn classify_type(type_name: &str) -> ColumnClass {
    let base = type_name
        .split('(')
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_lowercase();

    match base.as_str() {
        "timestamp without time zone" | "timestamp with time zone" | "timestamptz"
        | "timestamp" => ColumnClass::Timestamp,
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "real"
        | "double precision" | "float4" | "float8" | "numeric" | "decimal" => ColumnClass::Numeric,
        "json" | "jsonb" => ColumnClass::Json,
        _ => ColumnClass::Other,
    }
}

/// Introspect the ordered column list of a qualified table.
///
/// Returns an empty vec when the table does not exist; callers that need
/// existence as a distinct signal should use [`table_exists`].
pub fn table_columns(qualified: &str) -> Result<Vec<ColumnInfo>, PgRollupError> {
    Spi::connect(|client| {
        let result = client
            .select(
                "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod) \
                 FROM pg_attribute a \
                 WHERE a.attrelid = to_regclass($1) \
                   AND a.attnum > 0 AND NOT a.attisdropped \
                 ORDER BY a.attnum",
                None,
                &[qualified.into()],
            )
            .map_err(|e| PgRollupError::SpiError(e.to_string()))?;

        let mut out = Vec::new();
        for row in result {
            let name: String = row
                .get(1)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or_default();
            let type_name: String = row
                .get(2)
                .map_err(|e| PgRollupError::SpiError(e.to_string()))?
                .unwrap_or_default();
            let class = classify_type(&type_name);
            out.push(ColumnInfo {
                name,
                type_name,
                class,
            });
        }
        Ok(out)
    })
}

/// Whether a qualified relation name resolves to an existing relation.
pub fn table_exists(qualified: &str) -> Result<bool, PgRollupError> {
    Spi::get_one_with_args::<bool>("SELECT to_regclass($1) IS NOT NULL", &[qualified.into()])
        .map_err(|e| PgRollupError::SpiError(e.to_string()))
        .map(|opt| opt.unwrap_or(false))
}

/// Per-invocation cache of introspected tables.
///
/// One orchestrator invocation may process many configs against the same
/// source or target; the catalog is read once per table per invocation.
#[derive(Default)]
pub struct SchemaCache {
    tables: HashMap<String, Vec<ColumnInfo>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Columns of `qualified`, introspecting on first access.
    pub fn columns(&mut self, qualified: &str) -> Result<&[ColumnInfo], PgRollupError> {
        if !self.tables.contains_key(qualified) {
            let cols = table_columns(qualified)?;
            self.tables.insert(qualified.to_string(), cols);
        }
        Ok(self.tables.get(qualified).unwrap().as_slice())
    }
}

// ── Column classification ──────────────────────────────────────────────────

/// The typed projection plan for one (config, run).
///
/// Produced by [`classify_columns`]; consumed by the plan builder. Column
/// order within each set follows the source table's attribute order, and
/// dimension order follows the declared dimension list — the same ordered
/// list the bootstrap step uses for the target primary key.
#[derive(Debug, Clone, Default)]
pub struct ColumnPlan {
    /// Active declared dimensions present on the source.
    pub dimensions: Vec<String>,
    /// Declared dimensions missing from the source (logged, not fatal).
    pub missing_dimensions: Vec<String>,
    /// Numeric columns with a complete min/max/avg triplet on the target.
    pub numeric: Vec<String>,
    /// Numeric columns silently skipped for lack of the full triplet.
    pub skipped_numeric: Vec<String>,
    /// JSON columns present on the target (aggregated with array_agg).
    pub json: Vec<String>,
    /// Other non-numeric columns present on the target (aggregated with MODE).
    pub other: Vec<String>,
}

impl ColumnPlan {
    /// A degenerate plan aggregates nothing and groups by nothing beyond
    /// the bucket; running it would produce bare bucket counts for a
    /// misconfigured pair, so the run is aborted instead.
    pub fn is_degenerate(&self) -> bool {
        self.dimensions.is_empty()
            && self.numeric.is_empty()
            && self.json.is_empty()
            && self.other.is_empty()
    }
}

/// Whether a column name carries an aggregate-output prefix.
fn has_reserved_prefix(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Derive the projection plan from source columns, target columns, and the
/// declared dimension list.
///
/// Gates, in order:
/// - the source must carry a `timestamp` column;
/// - a declared dimension is kept only if it exists on the source
///   (missing ones are reported back for error-logging);
/// - a numeric column is kept only if the target has all three of
///   `min_x`, `max_x`, `avg_x` — otherwise it is silently skipped;
/// - a JSON or other non-numeric column is kept only if the target has a
///   column of the same name.
pub fn classify_columns(
    source: &str,
    source_cols: &[ColumnInfo],
    target_cols: &[ColumnInfo],
    declared_dims: &[String],
) -> Result<ColumnPlan, PgRollupError> {
    let has_timestamp = source_cols
        .iter()
        .any(|c| c.name == TIMESTAMP_COLUMN && c.class == ColumnClass::Timestamp);
    if !has_timestamp {
        return Err(PgRollupError::MissingTimestampColumn(source.to_string()));
    }

    let source_names: Vec<&str> = source_cols.iter().map(|c| c.name.as_str()).collect();
    let target_names: Vec<&str> = target_cols.iter().map(|c| c.name.as_str()).collect();

    let mut plan = ColumnPlan::default();

    for dim in declared_dims {
        if source_names.contains(&dim.as_str()) {
            plan.dimensions.push(dim.clone());
        } else {
            plan.missing_dimensions.push(dim.clone());
        }
    }

    for col in source_cols {
        let name = col.name.as_str();
        if name == TIMESTAMP_COLUMN
            || plan.dimensions.iter().any(|d| d == name)
            || RESERVED_COLUMNS.contains(&name)
        {
            continue;
        }

        match col.class {
            // Prefixed numerics are existing aggregate outputs, never
            // re-aggregated.
            ColumnClass::Numeric if has_reserved_prefix(name) => {}
            ColumnClass::Numeric => {
                let has_triplet = RESERVED_PREFIXES
                    .iter()
                    .all(|p| target_names.contains(&format!("{}{}", p, name).as_str()));
                if has_triplet {
                    plan.numeric.push(col.name.clone());
                } else {
                    plan.skipped_numeric.push(col.name.clone());
                }
            }
            ColumnClass::Json => {
                if target_names.contains(&name) {
                    plan.json.push(col.name.clone());
                }
            }
            ColumnClass::Other => {
                if target_names.contains(&name) {
                    plan.other.push(col.name.clone());
                }
            }
            // Extra timestamp columns are neither grouped nor aggregated.
            ColumnClass::Timestamp => {}
        }
    }

    Ok(plan)
}
