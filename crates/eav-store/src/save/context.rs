//! Session state threaded through a save and its nested child saves.

use std::collections::HashMap;

use crate::core::traits::DbConnection;

/// The open connection plus where in the call chain we are.
///
/// Only the outermost context owns the connection; nested contexts borrow it
/// and must leave it open.
pub(crate) struct SaveContext<'c> {
    conn: &'c mut dyn DbConnection,
    depth: usize,
    strict: bool,
    /// Child GUID to the GUID of the parent that referenced it.
    parents: HashMap<String, String>,
}

impl<'c> SaveContext<'c> {
    pub fn outermost(conn: &'c mut dyn DbConnection, strict: bool) -> Self {
        Self {
            conn,
            depth: 0,
            strict,
            parents: HashMap::new(),
        }
    }

    /// Context for a child save sharing this connection.
    pub fn nested(&mut self, parents: HashMap<String, String>) -> SaveContext<'_> {
        SaveContext {
            conn: &mut *self.conn,
            depth: self.depth + 1,
            strict: self.strict,
            parents,
        }
    }

    pub fn conn(&mut self) -> &mut dyn DbConnection {
        &mut *self.conn
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether every write belongs to one enclosing transaction.
    pub fn strict(&self) -> bool {
        self.strict
    }

    pub fn parents(&self) -> &HashMap<String, String> {
        &self.parents
    }
}
