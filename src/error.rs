// src/error.rs
//
// Behavioral error categories from the spec's error-handling design.
// Most of the spec's failure modes (queue overflow, oversized message,
// retry exhaustion, duplicate lookup) are handled locally via callbacks
// and logging, never as a `Result`. `DhtError` only covers the few paths
// that cross an API boundary a caller can meaningfully react to.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DhtError {
    #[error("network has no free addresses to assign")]
    AddressSpaceExhausted,

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}

pub type Result<T> = std::result::Result<T, DhtError>;
