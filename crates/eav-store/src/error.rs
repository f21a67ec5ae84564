//! Error types for the persistence engine.

use thiserror::Error;

use crate::core::field::FieldId;

/// Main error type for persistence operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Configuration error (missing connection properties, invalid YAML, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection could not be acquired from the pool
    #[error("Connectivity error: {message}\n  Context: {context}")]
    Connectivity { message: String, context: String },

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// SQLite or MySQL driver error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Result set did not have the expected shape
    #[error("Query error: {0}")]
    Query(String),

    /// DDL for a schema component failed to execute
    #[error("Schema bootstrap failed for {component}: {message}")]
    SchemaBootstrap { component: String, message: String },

    /// A category's batched write failed
    #[error("Batch write failed for {category}: {message}")]
    BatchWrite { category: String, message: String },

    /// Enum text that is not one of the field's declared values
    #[error("Value '{value}' is not declared for enum field {field_id}")]
    UnknownEnumValue { field_id: FieldId, value: String },

    /// Field id missing from the catalog
    #[error("Field {0} is not registered in the catalog")]
    UnknownField(FieldId),

    /// Field id registered twice with a different definition
    #[error("The field id [{field_id}] is already bound to '{existing}', cannot rebind to '{requested}'")]
    FieldRebound {
        field_id: FieldId,
        existing: String,
        requested: String,
    },

    /// IO error (config and DDL override files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StoreError {
    /// Create a Connectivity error with context about where it occurred
    pub fn connectivity(message: impl Into<String>, context: impl Into<String>) -> Self {
        StoreError::Connectivity {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a BatchWrite error
    pub fn batch_write(category: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::BatchWrite {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaBootstrap error
    pub fn bootstrap(component: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::SchemaBootstrap {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            StoreError::Config(_) | StoreError::Yaml(_) | StoreError::Io(_) => 2,
            StoreError::Connectivity { .. } => 3,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(StoreError::Config("x".into()).exit_code(), 2);
        assert_eq!(StoreError::connectivity("refused", "connect").exit_code(), 3);
        assert_eq!(StoreError::batch_write("strings", "boom").exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = StoreError::bootstrap("StoreText", "syntax error");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Schema bootstrap failed for StoreText"));
        assert!(detailed.contains("syntax error"));
    }
}
