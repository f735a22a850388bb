//! Per-call serialization context and its TOML form.

use crate::envelope::{CURRENT_VERSION, SUPPORTED_VERSIONS};
use crate::error::{SerializationError, SerializationResult};
use crate::whitelist::{AllWhitelist, ClassWhitelist, EmptyWhitelist, WhitelistConfig, WhitelistPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Why serialization is happening. Advisory only; custom serializers may
/// read it from the write or read context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UseCase {
    P2p,
    RpcServer,
    RpcClient,
    Storage,
    Checkpoint,
    #[default]
    Testing,
}

impl UseCase {
    /// Whether payloads for this use case arrive from outside the process's
    /// trust boundary.
    pub fn is_untrusted(self) -> bool {
        matches!(self, Self::P2p | Self::RpcServer)
    }

    /// The class whitelist a context starts with when none is configured:
    /// closed for untrusted peers, open otherwise.
    pub fn default_whitelist(self) -> Arc<dyn ClassWhitelist> {
        if self.is_untrusted() {
            Arc::new(EmptyWhitelist)
        } else {
            Arc::new(AllWhitelist)
        }
    }
}

/// Optional wrapping of the data section that an envelope may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationEncoding {
    Deflate,
    Snappy,
}

impl SerializationEncoding {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Deflate),
            2 => Some(Self::Snappy),
            _ => None,
        }
    }
}

impl fmt::Display for SerializationEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deflate => f.write_str("deflate"),
            Self::Snappy => f.write_str("snappy"),
        }
    }
}

/// Decides which claimed data encodings an envelope may carry.
pub trait EncodingWhitelist: Send + Sync + fmt::Debug {
    fn accepts(&self, encoding: SerializationEncoding) -> bool;
}

/// Accepts no encoding; only plain data sections decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEncodings;

impl EncodingWhitelist for NoEncodings {
    fn accepts(&self, _encoding: SerializationEncoding) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllEncodings;

impl EncodingWhitelist for AcceptAllEncodings {
    fn accepts(&self, _encoding: SerializationEncoding) -> bool {
        true
    }
}

/// Accepts only the fast encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickEncodingWhitelist;

impl EncodingWhitelist for QuickEncodingWhitelist {
    fn accepts(&self, encoding: SerializationEncoding) -> bool {
        encoding == SerializationEncoding::Snappy
    }
}

/// An explicit set of accepted encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptedEncodings(pub HashSet<SerializationEncoding>);

impl EncodingWhitelist for AcceptedEncodings {
    fn accepts(&self, encoding: SerializationEncoding) -> bool {
        self.0.contains(&encoding)
    }
}

/// Bounds applied to untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DecodeLimits {
    /// Maximum nesting of values, on encode and decode.
    pub max_depth: usize,
    pub max_envelope_bytes: usize,
    /// Maximum element count of one list or map.
    pub max_collection_len: usize,
    pub max_schema_entries: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_depth: 128,
            max_envelope_bytes: 64 * 1024 * 1024,
            max_collection_len: 1 << 20,
            max_schema_entries: 4096,
        }
    }
}

/// Options consumed by one `serialize` or `deserialize` call.
#[derive(Debug, Clone)]
pub struct SerializationContext {
    /// When false, repeated identities are written as copies and an identity
    /// cycle fails the encode.
    pub object_references_enabled: bool,
    /// Checked on every decoded type name. The default [`AllWhitelist`]
    /// permits everything and is only fit for trusted input; contexts built
    /// for [`UseCase::P2p`] or [`UseCase::RpcServer`] start from
    /// [`EmptyWhitelist`] instead.
    pub whitelist: Arc<dyn ClassWhitelist>,
    pub encoding_whitelist: Arc<dyn EncodingWhitelist>,
    pub use_case: UseCase,
    pub preferred_serialization_version: u8,
    /// When true, dropping a non-null remote-only field fails the decode.
    pub prevent_data_loss: bool,
    pub limits: DecodeLimits,
}

impl Default for SerializationContext {
    fn default() -> Self {
        Self {
            object_references_enabled: true,
            whitelist: Arc::new(AllWhitelist),
            encoding_whitelist: Arc::new(NoEncodings),
            use_case: UseCase::default(),
            preferred_serialization_version: CURRENT_VERSION,
            prevent_data_loss: false,
            limits: DecodeLimits::default(),
        }
    }
}

impl SerializationContext {
    pub fn new(use_case: UseCase) -> Self {
        Self {
            use_case,
            whitelist: use_case.default_whitelist(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_object_references(mut self, enabled: bool) -> Self {
        self.object_references_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_whitelist(mut self, whitelist: Arc<dyn ClassWhitelist>) -> Self {
        self.whitelist = whitelist;
        self
    }

    #[must_use]
    pub fn with_encoding_whitelist(mut self, whitelist: Arc<dyn EncodingWhitelist>) -> Self {
        self.encoding_whitelist = whitelist;
        self
    }

    #[must_use]
    pub fn with_use_case(mut self, use_case: UseCase) -> Self {
        self.use_case = use_case;
        self
    }

    #[must_use]
    pub fn with_preferred_version(mut self, version: u8) -> Self {
        self.preferred_serialization_version = version;
        self
    }

    #[must_use]
    pub fn with_prevent_data_loss(mut self, prevent: bool) -> Self {
        self.prevent_data_loss = prevent;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The version an encoder should write.
    pub(crate) fn write_version(&self) -> Option<u8> {
        let preferred = self.preferred_serialization_version;
        SUPPORTED_VERSIONS.contains(&preferred).then_some(preferred)
    }

    pub fn from_toml_str(contents: &str) -> SerializationResult<Self> {
        let config: ContextConfig =
            toml::from_str(contents).map_err(|e| SerializationError::Config(e.to_string()))?;
        Ok(config.into_context())
    }

    pub fn load_from(path: &Path) -> SerializationResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SerializationError::Config(format!("{}: {e}", path.display())))?;
        let context = Self::from_toml_str(&contents)?;
        info!("Loaded serialization context from {:?}", path);
        Ok(context)
    }
}

/// TOML form of a [`SerializationContext`].
///
/// ```toml
/// object-references-enabled = true
/// use-case = "storage"
/// prevent-data-loss = true
/// accepted-encodings = ["snappy"]
///
/// [limits]
/// max-depth = 64
///
/// [whitelist]
/// mode = "allowlist"
/// allowed-prefixes = ["app."]
/// ```
///
/// Without a `[whitelist]` table the use case picks the whitelist: nothing is
/// permitted for `p2p` or `rpc-server`, everything otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContextConfig {
    pub object_references_enabled: bool,
    pub use_case: UseCase,
    pub preferred_serialization_version: u8,
    pub prevent_data_loss: bool,
    pub accepted_encodings: Vec<SerializationEncoding>,
    pub limits: DecodeLimits,
    pub whitelist: Option<WhitelistConfig>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            object_references_enabled: true,
            use_case: UseCase::default(),
            preferred_serialization_version: CURRENT_VERSION,
            prevent_data_loss: false,
            accepted_encodings: Vec::new(),
            limits: DecodeLimits::default(),
            whitelist: None,
        }
    }
}

impl ContextConfig {
    pub fn into_context(self) -> SerializationContext {
        let whitelist: Arc<dyn ClassWhitelist> = match self.whitelist {
            Some(config) => Arc::new(WhitelistPolicy::with_config(config)),
            None => self.use_case.default_whitelist(),
        };
        let encoding_whitelist: Arc<dyn EncodingWhitelist> = if self.accepted_encodings.is_empty()
        {
            Arc::new(NoEncodings)
        } else {
            Arc::new(AcceptedEncodings(self.accepted_encodings.into_iter().collect()))
        };
        SerializationContext {
            object_references_enabled: self.object_references_enabled,
            whitelist,
            encoding_whitelist,
            use_case: self.use_case,
            preferred_serialization_version: self.preferred_serialization_version,
            prevent_data_loss: self.prevent_data_loss,
            limits: self.limits,
        }
    }
}
