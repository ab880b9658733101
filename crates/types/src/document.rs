//! JSON interchange format of color definitions.
//!
//! A document holds human readable fields (`name`, `issuer`, `unit`, `url`
//! and so on) next to the mandatory `definition` field: hex of the raw mode
//! encoding. The binary form is authoritative, the other fields are a
//! convenience.

use std::collections::BTreeMap;

use hue_marshal::Serializable;

use crate::definition::NAME_KEY;
use crate::{ColorDefinition, DefinitionError};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DefinitionDocument {
    /// Hex encoded raw mode serialization of the definition.
    pub definition: String,

    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl DefinitionDocument {
    /// Wrap the definition, copying its committed metadata into the
    /// document fields.
    pub fn from_definition(definition: &ColorDefinition) -> Self {
        Self {
            definition: hex::encode(definition.to_raw_bytes()),
            fields: definition.metadata().clone(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode the embedded definition.
    ///
    /// A `name` field must agree with the committed name, if the definition
    /// commits to one.
    pub fn decode(&self) -> Result<ColorDefinition, DefinitionError> {
        let bytes = hex::decode(&self.definition)?;
        let definition = ColorDefinition::from_raw_bytes(&bytes)?;

        if let (Some(document), Some(committed)) = (self.fields.get(NAME_KEY), definition.name()) {
            if document != committed {
                return Err(DefinitionError::NameMismatch {
                    document: document.clone(),
                    committed: committed.to_string(),
                });
            }
        }

        Ok(definition)
    }
}

impl ColorDefinition {
    /// Parse definition from its JSON document.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        DefinitionDocument::from_json(json)?.decode()
    }

    pub fn to_json(&self) -> Result<String, DefinitionError> {
        DefinitionDocument::from_definition(self).to_json()
    }
}
