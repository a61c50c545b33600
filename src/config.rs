use crate::resolver::Resolver;
use crate::rules::RuleSet;
use crate::synopsis::options::SynopsisSettings;
use crate::synopsis::Synopsis;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Custom rule table; the shipped table is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<String>,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Only used when the state file does not exist yet; existing state
    /// carries its own options.
    #[serde(default)]
    pub synopsis: SynopsisSettings,
}

fn default_state_file() -> String {
    "/var/lib/publisher-attention/synopsis.json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rules_file: None,
            state_file: default_state_file(),
            synopsis: SynopsisSettings::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn resolver(&self) -> anyhow::Result<Resolver> {
        match &self.rules_file {
            Some(path) => {
                let rules = RuleSet::from_file(path)
                    .with_context(|| format!("Failed to load rule table {path}"))?;
                Ok(Resolver::new(rules))
            }
            None => Ok(Resolver::default()),
        }
    }

    /// Restore the synopsis from the state file, or start a fresh one.
    pub fn load_synopsis(&self) -> anyhow::Result<Synopsis> {
        let synopsis = if Path::new(&self.state_file).exists() {
            let bytes = std::fs::read(&self.state_file)
                .with_context(|| format!("Failed to read state file {}", self.state_file))?;
            Synopsis::from_slice(&bytes)
                .with_context(|| format!("Failed to restore state from {}", self.state_file))?
        } else {
            log::info!("No state at {}, starting fresh", self.state_file);
            Synopsis::new(self.synopsis.clone())?
        };
        Ok(synopsis.with_resolver(self.resolver()?))
    }

    pub fn save_synopsis(&self, synopsis: &mut Synopsis) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.state_file).parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }
        let json = synopsis.to_json()?;
        std::fs::write(&self.state_file, json)
            .with_context(|| format!("Failed to write state file {}", self.state_file))?;
        log::info!("Saved {} publishers to {}", synopsis.len(), self.state_file);
        Ok(())
    }
}
