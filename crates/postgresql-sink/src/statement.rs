//! Multi-row INSERT builder that tracks bind parameters.
//!
//! PostgreSQL's wire protocol encodes the parameter count as an `i16`-sized
//! field, so one statement may bind at most 65,535 values. The builder plans
//! how many rows fit in one statement given the column count and the
//! configured sub-batch size, and renders placeholders for exactly that
//! many rows.

/// Upper bound on bind parameters in one statement.
pub const MAX_PARAMETERS: usize = 65_535;

/// A parameterized `INSERT ... VALUES (...), (...) [ON CONFLICT ...]`.
#[derive(Debug, Clone)]
pub struct InsertStatement {
    table: &'static str,
    columns: &'static [&'static str],
    on_conflict: Option<&'static str>,
    max_rows: usize,
}

impl InsertStatement {
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            on_conflict: None,
            max_rows: usize::MAX,
        }
    }

    /// Clause appended verbatim after the VALUES list, e.g. `ON CONFLICT (id) DO NOTHING`.
    pub fn on_conflict(mut self, clause: &'static str) -> Self {
        self.on_conflict = Some(clause);
        self
    }

    /// Cap rows per statement below what the parameter limit allows.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows.max(1);
        self
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Rows per statement: the sub-batch cap or the parameter ceiling, whichever is lower.
    pub fn rows_per_statement(&self) -> usize {
        let by_parameters = MAX_PARAMETERS / self.columns.len().max(1);
        self.max_rows.min(by_parameters).max(1)
    }

    /// Split `row_count` rows into consecutive `(start, len)` ranges, one per statement.
    pub fn plan(&self, row_count: usize) -> Vec<(usize, usize)> {
        let step = self.rows_per_statement();
        (0..row_count)
            .step_by(step)
            .map(|start| (start, step.min(row_count - start)))
            .collect()
    }

    /// Render the statement for `rows` rows. Placeholders are numbered row-major.
    pub fn sql(&self, rows: usize) -> String {
        let width = self.columns.len();
        let values = (0..rows)
            .map(|row| {
                let placeholders = (1..=width)
                    .map(|col| format!("${}", row * width + col))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({placeholders})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        let columns = self
            .columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("INSERT INTO {} ({columns}) VALUES {values}", self.table);
        if let Some(clause) = self.on_conflict {
            sql.push(' ');
            sql.push_str(clause);
        }
        sql
    }
}
