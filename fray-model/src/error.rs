// fray-model/src/error.rs
//! Error types for model construction, encoding and dependency resolution.

use thiserror::Error;

/// Errors surfaced by the model core.
///
/// Mutation exhaustion is *not* an error: `mutate()` returning `false` is the
/// normal terminal signal of a campaign.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Invalid field or container construction: incompatible encoder,
    /// malformed length/count configuration, duplicate sibling name.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A value handed to an encoder falls outside its accepted domain.
    #[error("encoding domain violation: {0}")]
    Encoding(String),

    /// A dependent field references an unknown or ambiguous name, or the
    /// dependency graph cannot be resolved to a stable rendering.
    #[error("dependency resolution failed: {0}")]
    Dependency(String),

    /// No dynamic field carries the requested override key.
    #[error("unknown dynamic key: {0}")]
    DynamicKey(String),
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
