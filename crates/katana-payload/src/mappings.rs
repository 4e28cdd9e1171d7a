//! Compact field-name aliases shared by protocol payloads.
//!
//! Payload keys travel on the wire under short aliases (`"command"` becomes
//! `"c"`). Path resolution consults the alias table per segment and only when
//! the literal key is absent, so structures written with aliasing disabled
//! remain readable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;

/// Long field name to compact alias pairs used by the platform protocol.
pub const FIELD_MAPPINGS: &[(&str, &str)] = &[
    ("action", "a"),
    ("address", "a"),
    ("arguments", "a"),
    ("attributes", "a"),
    ("available", "a"),
    ("actions", "ac"),
    ("array_format", "af"),
    ("base_path", "b"),
    ("body", "b"),
    ("buffers", "b"),
    ("busy", "b"),
    ("cached", "c"),
    ("call", "c"),
    ("calls", "c"),
    ("code", "c"),
    ("collection", "c"),
    ("command", "c"),
    ("component", "c"),
    ("config", "c"),
    ("count", "c"),
    ("cpu", "c"),
    ("command_reply", "cr"),
    ("data", "d"),
    ("datetime", "d"),
    ("default_value", "d"),
    ("deprecated", "dp"),
    ("disk", "d"),
    ("path_delimiter", "d"),
    ("allow_empty", "e"),
    ("entity_path", "e"),
    ("errors", "e"),
    ("error", "E"),
    ("enum", "em"),
    ("exclusive_minimum", "en"),
    ("exclusive_maximum", "ex"),
    ("family", "f"),
    ("filename", "f"),
    ("files", "f"),
    ("format", "f"),
    ("form-data", "f"),
    ("free", "f"),
    ("gateway", "g"),
    ("header", "h"),
    ("headers", "h"),
    ("http", "h"),
    ("http_body", "hb"),
    ("http_input", "hi"),
    ("http_method", "hm"),
    ("http_security", "hs"),
    ("id", "i"),
    ("idle", "i"),
    ("in", "i"),
    ("input", "i"),
    ("items", "i"),
    ("primary_key", "k"),
    ("laddr", "l"),
    ("level", "l"),
    ("links", "l"),
    ("memory", "m"),
    ("message", "m"),
    ("meta", "m"),
    ("method", "m"),
    ("mime", "m"),
    ("minimum", "mn"),
    ("multiple_of", "mo"),
    ("maximum", "mx"),
    ("name", "n"),
    ("network", "n"),
    ("minimum_items", "ni"),
    ("minimum_length", "nl"),
    ("origin", "o"),
    ("out", "o"),
    ("params", "p"),
    ("path", "p"),
    ("pattern", "p"),
    ("percent", "p"),
    ("pid", "p"),
    ("post_data", "p"),
    ("properties", "p"),
    ("protocol", "p"),
    ("query", "q"),
    ("raddr", "r"),
    ("reads", "r"),
    ("request", "r"),
    ("required", "r"),
    ("relations", "r"),
    ("result", "r"),
    ("response", "R"),
    ("schema", "s"),
    ("schemes", "s"),
    ("scope", "s"),
    ("service", "s"),
    ("shared", "s"),
    ("size", "s"),
    ("status", "s"),
    ("swap", "s"),
    ("system", "s"),
    ("terminate", "t"),
    ("token", "t"),
    ("total", "t"),
    ("transactions", "t"),
    ("type", "t"),
    ("transport", "T"),
    ("url", "u"),
    ("used", "u"),
    ("user", "u"),
    ("unique_items", "ui"),
    ("value", "v"),
    ("version", "v"),
    ("iowait", "w"),
    ("writes", "w"),
    ("execution_timeout", "x"),
    ("maximum_items", "xi"),
    ("maximum_length", "xl"),
];

static PLATFORM_TABLE: Lazy<Arc<FieldMappings>> =
    Lazy::new(|| Arc::new(FieldMappings::from_pairs(FIELD_MAPPINGS.iter().copied())));

static COMPACT_NAMES: AtomicBool = AtomicBool::new(true);

/// Table translating long field names into compact aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMappings {
    aliases: HashMap<String, String>,
}

impl FieldMappings {
    /// Builds a table from `(name, alias)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            aliases: pairs
                .into_iter()
                .map(|(name, alias)| (name.into(), alias.into()))
                .collect(),
        }
    }

    /// Returns the alias registered for `name`.
    #[must_use]
    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    /// Number of registered aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Returns `true` when no aliases are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Iterates over the `(name, alias)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(name, alias)| (name.as_str(), alias.as_str()))
    }
}

/// Alias configuration carried by every payload.
///
/// Cloning is cheap; enabled tables are shared behind an [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mappings {
    /// Keys are stored and resolved verbatim.
    Disabled,
    /// Keys resolve through the given alias table.
    Enabled(Arc<FieldMappings>),
}

impl Mappings {
    /// The platform alias table.
    #[must_use]
    pub fn compact() -> Self {
        Self::Enabled(Arc::clone(&PLATFORM_TABLE))
    }

    /// No aliasing at all.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::Disabled
    }

    /// A caller-supplied alias table.
    #[must_use]
    pub fn custom(table: FieldMappings) -> Self {
        Self::Enabled(Arc::new(table))
    }

    /// Mappings new payloads receive unless told otherwise.
    ///
    /// This is the platform table unless compact names were switched off with
    /// [`Mappings::set_compact_names`].
    #[must_use]
    pub fn process_default() -> Self {
        if Self::compact_names_enabled() {
            Self::compact()
        } else {
            Self::Disabled
        }
    }

    /// Enables or disables compact names for every payload created afterwards.
    ///
    /// Called once while the process configures itself.
    pub fn set_compact_names(enabled: bool) {
        COMPACT_NAMES.store(enabled, Ordering::SeqCst);
    }

    /// Reports whether compact names are enabled for this process.
    #[must_use]
    pub fn compact_names_enabled() -> bool {
        COMPACT_NAMES.load(Ordering::SeqCst)
    }

    /// Returns `true` when an alias table is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Returns the alias for `name`, or `name` itself when none applies.
    #[must_use]
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        match self {
            Self::Enabled(table) => table.alias(name).unwrap_or(name),
            Self::Disabled => name,
        }
    }
}

impl Default for Mappings {
    fn default() -> Self {
        Self::process_default()
    }
}
