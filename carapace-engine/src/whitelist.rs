//! Decode-time class whitelist.
//!
//! Every composite and enum named by an envelope's schema, and every type a
//! custom proxy stands in for, is checked before the data section is
//! touched. One rejection aborts the whole envelope.
//!
//! [`WhitelistPolicy`] reads the allow-list from TOML:
//!
//! ```toml
//! [whitelist]
//! mode = "allowlist"
//! allowed-types = ["app.Person"]
//! allowed-prefixes = ["app.model."]
//! denied-types = ["app.model.Secret"]
//! ```

use crate::error::{SerializationError, SerializationResult};
use carapace_model::{Schema, TypeKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Decides which type names may be instantiated during decode.
pub trait ClassWhitelist: Send + Sync + fmt::Debug {
    fn has_listed(&self, type_name: &str) -> bool;
}

/// Permits every type. Suitable for trusted input only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllWhitelist;

impl ClassWhitelist for AllWhitelist {
    fn has_listed(&self, _type_name: &str) -> bool {
        true
    }
}

/// Permits nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWhitelist;

impl ClassWhitelist for EmptyWhitelist {
    fn has_listed(&self, _type_name: &str) -> bool {
        false
    }
}

/// Exact-name whitelist that can grow after construction.
#[derive(Debug, Default)]
pub struct MutableClassWhitelist {
    types: RwLock<HashSet<String>>,
}

impl MutableClassWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: RwLock::new(types.into_iter().map(Into::into).collect()),
        }
    }

    pub fn add(&self, type_name: impl Into<String>) {
        self.types.write().insert(type_name.into());
    }

    pub fn remove(&self, type_name: &str) -> bool {
        self.types.write().remove(type_name)
    }
}

impl ClassWhitelist for MutableClassWhitelist {
    fn has_listed(&self, type_name: &str) -> bool {
        self.types.read().contains(type_name)
    }
}

/// Whitelist policy mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistMode {
    #[default]
    /// Only listed types (or types under a listed prefix) are permitted.
    Allowlist,
    /// Everything except the denied types is permitted.
    Denylist,
    /// No restriction.
    Unrestricted,
}

/// Whitelist settings, as found under `[whitelist]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WhitelistConfig {
    pub mode: WhitelistMode,
    pub allowed_types: Vec<String>,
    pub allowed_prefixes: Vec<String>,
    pub denied_types: Vec<String>,
}

impl WhitelistConfig {
    pub fn unrestricted() -> Self {
        Self {
            mode: WhitelistMode::Unrestricted,
            ..Default::default()
        }
    }
}

/// Raw TOML structure of a whitelist policy file.
#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    whitelist: WhitelistConfig,
}

/// A [`ClassWhitelist`] driven by a [`WhitelistConfig`].
#[derive(Debug, Clone, Default)]
pub struct WhitelistPolicy {
    config: WhitelistConfig,
    policy_path: Option<PathBuf>,
}

impl WhitelistPolicy {
    /// Loads a policy file, never failing.
    ///
    /// A missing file means unrestricted. An unreadable or unparsable file
    /// falls back to an empty allowlist.
    pub fn load_from(policy_path: PathBuf) -> Self {
        if !policy_path.exists() {
            info!("No whitelist policy at {:?}, decoding unrestricted", policy_path);
            return Self {
                config: WhitelistConfig::unrestricted(),
                policy_path: None,
            };
        }

        match Self::try_load_from(&policy_path) {
            Ok(policy) => {
                info!("Loaded whitelist policy from {:?}", policy_path);
                policy
            }
            Err(e) => {
                warn!(
                    "Failed to load whitelist policy {:?}: {}. Falling back to an empty allowlist.",
                    policy_path, e
                );
                Self {
                    config: WhitelistConfig::default(),
                    policy_path: Some(policy_path),
                }
            }
        }
    }

    /// Loads a policy file, reporting read and parse failures.
    pub fn try_load_from(policy_path: &Path) -> SerializationResult<Self> {
        let contents = std::fs::read_to_string(policy_path)
            .map_err(|e| SerializationError::Config(format!("{}: {e}", policy_path.display())))?;
        let mut policy = Self::from_toml_str(&contents)?;
        policy.policy_path = Some(policy_path.to_path_buf());
        Ok(policy)
    }

    pub fn from_toml_str(contents: &str) -> SerializationResult<Self> {
        let file: PolicyFile =
            toml::from_str(contents).map_err(|e| SerializationError::Config(e.to_string()))?;
        Ok(Self::with_config(file.whitelist))
    }

    pub fn with_config(config: WhitelistConfig) -> Self {
        Self {
            config,
            policy_path: None,
        }
    }

    pub fn config(&self) -> &WhitelistConfig {
        &self.config
    }

    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }
}

impl ClassWhitelist for WhitelistPolicy {
    fn has_listed(&self, type_name: &str) -> bool {
        let denied = self.config.denied_types.iter().any(|t| t == type_name);
        match self.config.mode {
            WhitelistMode::Unrestricted => true,
            WhitelistMode::Denylist => !denied,
            WhitelistMode::Allowlist => {
                !denied
                    && (self.config.allowed_types.iter().any(|t| t == type_name)
                        || self
                            .config
                            .allowed_prefixes
                            .iter()
                            .any(|p| type_name.starts_with(p.as_str())))
            }
        }
    }
}

/// Applies a [`ClassWhitelist`] to decoded schemas.
pub struct WhitelistGuard<'w> {
    whitelist: &'w dyn ClassWhitelist,
}

impl<'w> WhitelistGuard<'w> {
    pub fn new(whitelist: &'w dyn ClassWhitelist) -> Self {
        Self { whitelist }
    }

    pub fn allow(&self, type_name: &str) -> bool {
        self.whitelist.has_listed(type_name)
    }

    pub fn check(&self, type_name: &str) -> SerializationResult<()> {
        if self.allow(type_name) {
            return Ok(());
        }
        warn!(type_name, "Rejected type not on the deserialization whitelist");
        Err(SerializationError::WhitelistRejected {
            type_name: type_name.to_string(),
        })
    }

    /// Checks every instantiable entry of `schema`. Collection entries are
    /// structural and are not checked; their element types have entries of
    /// their own.
    pub fn check_schema(&self, schema: &Schema) -> SerializationResult<()> {
        for entry in schema.iter() {
            let instantiable = match &entry.kind {
                TypeKind::Composite { .. } => true,
                TypeKind::Restricted(_) => entry.is_enum(),
            };
            if instantiable {
                self.check(&entry.type_name)?;
            }
            if let Some(target) = &entry.proxies {
                self.check(target)?;
            }
        }
        debug!(entries = schema.len(), "Schema passed whitelist");
        Ok(())
    }
}
