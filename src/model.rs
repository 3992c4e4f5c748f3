//! Models, projects, and the acting operator.

use serde::{Deserialize, Serialize};

use crate::id::{IntegrationId, ModelId, ProjectId, SchemaId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
}

impl Project {
    pub fn new() -> Self {
        Self {
            id: ProjectId::new(),
        }
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

/// A content model: the binding of a main schema (and optionally a metadata
/// schema) to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub project: ProjectId,
    pub schema: SchemaId,
    pub metadata_schema: Option<SchemaId>,
}

impl Model {
    pub fn new(project: ProjectId, schema: SchemaId) -> Self {
        Self {
            id: ModelId::new(),
            project,
            schema,
            metadata_schema: None,
        }
    }

    pub fn with_metadata_schema(mut self, schema: SchemaId) -> Self {
        self.metadata_schema = Some(schema);
        self
    }
}

/// The identity an import runs under. Items created or updated by the run
/// are attributed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    User(UserId),
    Integration(IntegrationId),
}

impl Operator {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Operator::User(id) => Some(*id),
            Operator::Integration(_) => None,
        }
    }

    pub fn integration(&self) -> Option<IntegrationId> {
        match self {
            Operator::Integration(id) => Some(*id),
            Operator::User(_) => None,
        }
    }
}
