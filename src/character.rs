use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub preamble: String,
}

impl Character {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        info!(path = path, "Loading character configuration");
        let content = std::fs::read_to_string(path)?;
        let character: Self = toml::from_str(&content)?;
        debug!(name = character.name, "Character loaded successfully");
        Ok(character)
    }
}
