//! Typed entities and the raw records they are stored as.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::error::StoreError;

/// Trait for models that live in the record store.
///
/// Implementors provide a stable identity so that writing the same remote
/// object twice updates one stored record instead of creating a second one.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier within the entity type (e.g., course id)
  fn id(&self) -> String;

  /// Entity type name for storage organization (e.g., "course", "assignment")
  fn entity_type() -> &'static str;
}

/// A stored row: the serialized form of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  pub entity_type: String,
  pub id: String,
  pub data: Value,
}

impl Record {
  pub fn new(entity_type: impl Into<String>, id: impl Into<String>, data: Value) -> Self {
    Self {
      entity_type: entity_type.into(),
      id: id.into(),
      data,
    }
  }

  /// Serialize a typed entity into a record.
  pub fn from_entity<T: Entity>(entity: &T) -> Result<Self, StoreError> {
    Ok(Self {
      entity_type: T::entity_type().to_string(),
      id: entity.id(),
      data: serde_json::to_value(entity)?,
    })
  }

  /// Deserialize the record back into its typed entity.
  pub fn to_entity<T: Entity>(&self) -> Result<T, StoreError> {
    Ok(T::deserialize(&self.data)?)
  }
}
