//! # Catalog Handles
//!
//! Read-only description of stored procedures and their statements.
//!
//! The model never mutates a catalog; it only needs to know which procedure
//! a graph belongs to and which statements that procedure may invoke.

use crate::{ProcedureId, StatementId};
use serde::{Deserialize, Serialize};

/// One parameterized query or update of a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub name: String,
}

impl Statement {
    #[must_use]
    pub fn new(id: StatementId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A stored procedure: a named transaction type with a fixed statement set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: ProcedureId,
    pub name: String,
    pub statements: Vec<Statement>,
}

impl Procedure {
    #[must_use]
    pub fn new(id: ProcedureId, name: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            id,
            name: name.into(),
            statements,
        }
    }

    /// Look up a statement of this procedure.
    #[must_use]
    pub fn statement(&self, id: StatementId) -> Option<&Statement> {
        self.statements.iter().find(|s| s.id == id)
    }

    /// True if the procedure declares the statement.
    #[must_use]
    pub fn contains_statement(&self, id: StatementId) -> bool {
        self.statement(id).is_some()
    }
}

/// A collection of procedures, as loaded by a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub procedures: Vec<Procedure>,
}

impl Catalog {
    #[must_use]
    pub fn new(procedures: Vec<Procedure>) -> Self {
        Self { procedures }
    }

    #[must_use]
    pub fn procedure(&self, id: ProcedureId) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn procedure_by_name(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }
}
