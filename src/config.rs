use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::simulation::network::{ConceptWeight, DEFAULT_NEIGHBOR_FACTOR};

/// Run parameters, read from a TOML file. Every field is optional in the
/// file; command-line flags override whatever the file sets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub seed: u64,
    pub neighbor_factor: f64,
    /// GML edge attribute holding the raw edge weight.
    pub weight_attribute: String,
    pub concept_weight: ConceptWeight,
    /// Distribution of root word weights not given by a wordlist.
    pub initial_weight: String,
    /// Without a tree, simulate one long branch of 2^N steps.
    pub branch_length_exponent: u32,
    pub workers: usize,
    /// How long a node may wait for its ancestor; unset means forever.
    pub ancestor_timeout_secs: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            seed: 0,
            neighbor_factor: DEFAULT_NEIGHBOR_FACTOR,
            weight_attribute: "FamilyWeight".to_string(),
            concept_weight: ConceptWeight::default(),
            initial_weight: "100".to_string(),
            branch_length_exponent: 20,
            workers: 1,
            ancestor_timeout_secs: None,
        }
    }
}

impl SimulationConfig {
    pub fn ancestor_timeout(&self) -> Option<Duration> {
        self.ancestor_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.neighbor_factor.is_finite() || self.neighbor_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "neighbor_factor must be finite and non-negative, got {}",
                self.neighbor_factor
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

pub fn load_config_from_file(file_path: &Path) -> Result<SimulationConfig, ConfigError> {
    let contents = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
        path: file_path.to_path_buf(),
        source,
    })?;
    let loaded_config =
        toml::from_str::<SimulationConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: file_path.to_path_buf(),
            source,
        })?;
    loaded_config.validate()?;
    Ok(loaded_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seed = 7\nworkers = 4\nconcept_weight = \"degree\"").unwrap();
        let config = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.workers, 4);
        assert_eq!(config.concept_weight, ConceptWeight::Degree);
        assert_eq!(config.neighbor_factor, DEFAULT_NEIGHBOR_FACTOR);
        assert_eq!(config.ancestor_timeout(), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers = 0").unwrap();
        assert!(matches!(
            load_config_from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sead = 1").unwrap();
        assert!(matches!(
            load_config_from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            load_config_from_file(Path::new("/nonexistent/lexsim.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
