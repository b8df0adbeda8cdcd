use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// One row of the universe table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEntry {
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Names of systems one stargate jump away.
    #[serde(default)]
    pub gates: Vec<String>,
}

/// Serialized form of the universe map.
///
/// ```json
/// { "systems": [ { "name": "9PX2-F", "region": "Tenerifis", "gates": ["OJOS-T"] } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseTable {
    #[serde(default)]
    pub systems: Vec<SystemEntry>,
}

impl UniverseTable {
    /// Read a table from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid table.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Universe(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
            .map_err(|e| CoreError::Universe(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn from_json(content: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }
}
