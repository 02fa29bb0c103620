use thiserror::Error;

use crate::instructions::instructions::InstrIndex;

/// Failures of the simulation core. Both kinds are fatal: the CPU refuses to
/// advance once one has been raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum SimError {
    #[error("no free temporary register to rename {arch_reg} for instruction #{instr} [{text}]")]
    RenameExhausted {
        arch_reg: String,
        instr: InstrIndex,
        text: String,
    },

    #[error("structural violation: {0}")]
    StructuralViolation(String),
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    IOError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
