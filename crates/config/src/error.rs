//! Errors produced while loading configuration from disk.

/// Failure modes of [`crate::Config::load`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration file could not be opened or read.
    #[error("Failed to open configuration file: {0}")]
    ConfigOpen(#[from] std::io::Error),
    /// The file's contents are not valid TOML, or don't match the schema.
    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// A `{{ env.VAR }}` placeholder referenced a variable that isn't set.
    #[error("At {path} failed substituing environment variable: {reason}")]
    EnvVarSubstitution {
        /// Dotted/indexed path to the offending value within the document.
        path: String,
        /// Underlying substitution failure message.
        reason: String,
    },
}
