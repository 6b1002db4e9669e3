// =============================================================================
// Observation Table
// =============================================================================
//
// The one data structure the whole workflow runs on: a table of observations
// with a categorical group label (the taxon) and named numeric columns.
//
// LIFECYCLE:
// ----------
// A table is created once from raw measurements and then only ever grows by
// appending derived columns (log transforms, centered predictors, per-group
// means and counts, fitted values, residuals). Rows are never deleted or
// reordered, so every derived column stays aligned with the originals by
// row order. Appending a column whose name is taken, whose length differs,
// or that contains non-finite values is an error.
//
// =============================================================================

use std::collections::BTreeMap;

use ndarray::Array1;

use crate::error::{MorphMixError, Result};

// =============================================================================
// Group index
// =============================================================================

/// Index of the grouping factor: sorted unique levels plus, per row, the
/// level each observation belongs to.
#[derive(Debug, Clone)]
pub struct GroupIndex {
    levels: Vec<String>,
    assignment: Vec<usize>,
    counts: Vec<usize>,
}

impl GroupIndex {
    /// Build the index from raw labels. Levels are sorted lexicographically.
    fn from_labels(labels: &[String]) -> Self {
        let mut level_map: BTreeMap<&str, usize> = BTreeMap::new();
        for label in labels {
            let next = level_map.len();
            level_map.entry(label.as_str()).or_insert(next);
        }
        // BTreeMap iteration is sorted; re-number in sorted order.
        let levels: Vec<String> = level_map.keys().map(|s| s.to_string()).collect();
        let sorted_map: BTreeMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let assignment: Vec<usize> = labels.iter().map(|l| sorted_map[l.as_str()]).collect();
        let mut counts = vec![0usize; levels.len()];
        for &g in &assignment {
            counts[g] += 1;
        }

        Self {
            levels,
            assignment,
            counts,
        }
    }

    /// Sorted unique level labels.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Level index for each row, aligned with the table's row order.
    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    /// Number of observations per level.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Number of distinct levels.
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Look up the index of a level by label.
    pub fn level_index(&self, label: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == label)
    }
}

// =============================================================================
// Observation table
// =============================================================================

/// A named numeric column.
#[derive(Debug, Clone)]
struct Column {
    name: String,
    values: Array1<f64>,
}

/// The observation table: group labels plus append-only numeric columns.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    labels: Vec<String>,
    groups: GroupIndex,
    columns: Vec<Column>,
}

impl ObservationTable {
    /// Create a table from per-row group labels. Columns are appended after.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(MorphMixError::EmptyInput(
                "observation table has no rows".to_string(),
            ));
        }
        let groups = GroupIndex::from_labels(&labels);
        Ok(Self {
            labels,
            groups,
            columns: Vec::new(),
        })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    /// Per-row group labels, in row order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The grouping-factor index.
    pub fn groups(&self) -> &GroupIndex {
        &self.groups
    }

    /// Names of the numeric columns, in append order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether a numeric column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Fetch a numeric column by name.
    pub fn column(&self, name: &str) -> Result<&Array1<f64>> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
            .ok_or_else(|| MorphMixError::UnknownColumn(name.to_string()))
    }

    /// Append a numeric column (the only mutation the table supports).
    ///
    /// Fails on a duplicate name, a length mismatch, or non-finite values.
    pub fn push_column(&mut self, name: &str, values: Array1<f64>) -> Result<()> {
        if self.has_column(name) {
            return Err(MorphMixError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.n_rows() {
            return Err(MorphMixError::DimensionMismatch(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(MorphMixError::InvalidValue(format!(
                "column '{}' row {} is not finite",
                name, pos
            )));
        }
        self.columns.push(Column {
            name: name.to_string(),
            values,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Derived-column joins
    // -------------------------------------------------------------------------

    /// Append the natural log of `src` as `name`.
    ///
    /// Every source value must be strictly positive.
    pub fn append_log(&mut self, src: &str, name: &str) -> Result<()> {
        let source = self.column(src)?;
        if let Some(pos) = source.iter().position(|&v| v <= 0.0) {
            return Err(MorphMixError::InvalidValue(format!(
                "cannot log column '{}': row {} is {} (must be > 0)",
                src, pos, source[pos]
            )));
        }
        let values = source.mapv(f64::ln);
        self.push_column(name, values)
    }

    /// Append `src` centered on its grand mean as `name`.
    pub fn append_centered(&mut self, src: &str, name: &str) -> Result<()> {
        let source = self.column(src)?;
        let mean = source.mean().unwrap_or(0.0);
        let values = source.mapv(|v| v - mean);
        self.push_column(name, values)
    }

    /// Append the per-group mean of `src`, joined back to every row, as `name`.
    pub fn append_group_mean(&mut self, src: &str, name: &str) -> Result<()> {
        let per_level = self.group_means(src)?;
        let values: Array1<f64> = self
            .groups
            .assignment()
            .iter()
            .map(|&g| per_level[g])
            .collect();
        self.push_column(name, values)
    }

    /// Append the per-group observation count, joined back to every row.
    pub fn append_group_count(&mut self, name: &str) -> Result<()> {
        let counts = self.groups.counts();
        let values: Array1<f64> = self
            .groups
            .assignment()
            .iter()
            .map(|&g| counts[g] as f64)
            .collect();
        self.push_column(name, values)
    }

    /// Per-level means of `src` (one value per group level, sorted-level order).
    pub fn group_means(&self, src: &str) -> Result<Array1<f64>> {
        let source = self.column(src)?;
        let g = self.groups.n_levels();
        let mut sums = vec![0.0f64; g];
        for (row, &level) in self.groups.assignment().iter().enumerate() {
            sums[level] += source[row];
        }
        let means: Array1<f64> = sums
            .iter()
            .zip(self.groups.counts())
            .map(|(&s, &n)| s / n as f64)
            .collect();
        Ok(means)
    }
}

// =============================================================================
// Tests
// =============================================================================
