use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Role a component plays on the platform.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ComponentKind {
    /// Business-logic actions contributing to a Transport.
    #[default]
    Service,
    /// HTTP request/response interceptor.
    Middleware,
}

/// Errors encountered while parsing a [`ComponentKind`] from text.
pub type ComponentKindParseError = strum::ParseError;
