//! Error types raised by payload access and encoding.

use thiserror::Error;

/// Errors raised while reading or writing payload paths.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum PayloadError {
    /// No value exists at the requested path and no default was available.
    #[error("path not found: \"{path}\"")]
    NotFound {
        /// The path that failed to resolve.
        path: String,
    },
    /// An intermediate segment holds a value that cannot be descended into.
    #[error("path segment \"{segment}\" does not hold a mapping")]
    NotTraversable {
        /// Raw segment name that blocked traversal.
        segment: String,
    },
    /// A push targeted a leaf that exists and is not a list.
    #[error("path segment \"{segment}\" does not hold a list")]
    NotAList {
        /// Resolved key of the offending leaf.
        segment: String,
    },
    /// A merge targeted a location that is not a mapping.
    #[error("value in path \"{path}\" is not a mapping")]
    NotAMap {
        /// Path of the offending value.
        path: String,
    },
    /// A short-lived payload was accessed after its time to live.
    #[error("Payload expired {offset:.3} seconds ago")]
    Expired {
        /// Seconds elapsed past the time to live.
        offset: f64,
    },
}

impl PayloadError {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn not_traversable(segment: impl Into<String>) -> Self {
        Self::NotTraversable {
            segment: segment.into(),
        }
    }
}

/// Errors raised by the binary pack/unpack codec.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The value could not be serialised.
    #[error("failed to pack payload: {source}")]
    Encode {
        /// Underlying msgpack encoder error.
        #[source]
        source: rmp_serde::encode::Error,
    },
    /// The bytes are not valid msgpack for a payload value.
    #[error("failed to unpack payload: {source}")]
    Decode {
        /// Underlying msgpack decoder error.
        #[source]
        source: rmp_serde::decode::Error,
    },
    /// The bytes decoded to a value other than a mapping.
    #[error("unpacked payload is a {kind}, expected a mapping")]
    NotAMap {
        /// Kind of value that was decoded.
        kind: &'static str,
    },
}
