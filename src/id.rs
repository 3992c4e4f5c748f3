//! Typed identifiers for the entities the pipeline touches.
//!
//! Each ID is a UUID newtype so that an item ID can never be passed where a
//! field ID is expected. IDs parse from the usual hyphenated form; braces are
//! tolerated on input because exported datasets frequently carry them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let trimmed = value.trim().trim_matches(|c| matches!(c, '{' | '}'));
                Uuid::parse_str(trimmed).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

entity_id!(
    /// Identifier of a content item.
    ItemId
);
entity_id!(
    /// Identifier of a schema field.
    FieldId
);
entity_id!(
    /// Identifier of a schema.
    SchemaId
);
entity_id!(
    /// Identifier of a content model.
    ModelId
);
entity_id!(
    /// Identifier of a project.
    ProjectId
);
entity_id!(
    /// Identifier of an asynchronous import job.
    JobId
);
entity_id!(
    /// Identifier of a human user.
    UserId
);
entity_id!(
    /// Identifier of a machine integration.
    IntegrationId
);
entity_id!(
    /// Identifier of a group-field instance on an item.
    GroupId
);
