//! Save outcomes.

use std::fmt;

use serde::Serialize;

/// One property kind, written by its own upsert/audit/commit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Overview,
    Booleans,
    Strings,
    DateTimes,
    ZonedDateTimes,
    Times,
    Longs,
    Doubles,
    Integers,
    Floats,
    Blobs,
    DateTimeArrays,
    StringArrays,
    LongArrays,
    DoubleArrays,
    IntegerArrays,
    FloatArrays,
    Enums,
    Reports,
    Objects,
}

impl Category {
    pub fn name(&self) -> &'static str {
        match self {
            Category::Overview => "overview",
            Category::Booleans => "booleans",
            Category::Strings => "strings",
            Category::DateTimes => "date_times",
            Category::ZonedDateTimes => "zoned_date_times",
            Category::Times => "times",
            Category::Longs => "longs",
            Category::Doubles => "doubles",
            Category::Integers => "integers",
            Category::Floats => "floats",
            Category::Blobs => "blobs",
            Category::DateTimeArrays => "date_time_arrays",
            Category::StringArrays => "string_arrays",
            Category::LongArrays => "long_arrays",
            Category::DoubleArrays => "double_arrays",
            Category::IntegerArrays => "integer_arrays",
            Category::FloatArrays => "float_arrays",
            Category::Enums => "enums",
            Category::Reports => "reports",
            Category::Objects => "objects",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A category that committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryOutcome {
    pub category: Category,
    /// Nesting depth; 0 for the entities passed to `save`.
    pub depth: usize,
    pub batch: usize,
    /// Rows written, audit rows included.
    pub rows: u64,
}

/// A category whose transaction was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFailure {
    pub category: Category,
    pub depth: usize,
    pub batch: usize,
    pub message: String,
}

/// Result of a save.
///
/// In fast mode a failed category does not stop the others, so a save can
/// partially succeed; `failed` lists what was rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    /// Batches processed at the top level.
    pub batches: usize,
    pub succeeded: Vec<CategoryOutcome>,
    pub failed: Vec<CategoryFailure>,
}

impl SaveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total rows written by committed categories.
    pub fn rows_written(&self) -> u64 {
        self.succeeded.iter().map(|o| o.rows).sum()
    }

    pub fn failed_categories(&self) -> impl Iterator<Item = Category> + '_ {
        self.failed.iter().map(|f| f.category)
    }
}
