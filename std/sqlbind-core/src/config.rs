///
/// Binder configuration.
///
/// Loaded from a TOML table such as:
///
/// ```toml
/// default_text_directive = "copy"
/// default_blob_directive = "borrow"
/// busy_timeout_ms = 2000
/// ```
///
/// Missing keys fall back to `BinderConfig::default()`. `cleanup` cannot be a
/// default because it needs a callback supplied per bind.
///

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, DirectiveKind};

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinderConfig {
    /// Directive used by `bind_text` when the caller does not pick one
    pub default_text_directive: DirectiveKind,
    /// Directive used by `bind_blob` when the caller does not pick one
    pub default_blob_directive: DirectiveKind,
    /// How long a connection waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            default_text_directive: DirectiveKind::Copy,
            default_blob_directive: DirectiveKind::Copy,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl BinderConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BinderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), ?config, "loaded binder config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, kind) in [
            ("default_text_directive", self.default_text_directive),
            ("default_blob_directive", self.default_blob_directive),
        ] {
            if kind == DirectiveKind::Cleanup {
                return Err(ConfigError::Invalid(format!(
                    "{key} cannot be 'cleanup': a cleanup directive needs a callback"
                )));
            }
        }
        Ok(())
    }
}
