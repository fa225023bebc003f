//! Conversion settings loaded from TOML

use std::path::Path;

use serde::Deserialize;

/// Top-level conversion configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversionConfig {
    /// Anthropic codec settings
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    /// Google codec settings
    #[serde(default)]
    pub google: GoogleConfig,
    /// JSON recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Anthropic codec configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// Run JSON recovery on assistant text decoded from responses and streams
    #[serde(default)]
    pub structured_output: bool,
}

/// Google codec configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GoogleConfig {
    /// Emit System messages as `systemInstruction` instead of merging them
    /// into the first user turn
    #[serde(default)]
    pub system_instruction: bool,
}

/// JSON recovery configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    /// Inputs longer than this skip the exhaustive search strategies
    #[serde(default = "default_max_scan_bytes")]
    pub max_scan_bytes: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_scan_bytes: default_max_scan_bytes(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_scan_bytes() -> usize {
    64 * 1024
}

impl ConversionConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails,
    /// or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml_str(&raw)
    }

    /// Validate that the configuration is internally consistent
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recovery.max_scan_bytes == 0 {
            anyhow::bail!("recovery.max_scan_bytes must be greater than zero");
        }

        Ok(())
    }
}
