//! The path-addressable [`Payload`] container.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::Map;
use crate::error::PayloadError;
use crate::mappings::Mappings;
use crate::path::{self, PathSpec};

/// Nested key/value data addressed through delimited paths.
///
/// Each payload carries its alias [`Mappings`] and an optional table of
/// per-path defaults consulted when a lookup would otherwise fail.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    data: Map,
    mappings: Mappings,
    defaults: BTreeMap<String, Value>,
}

impl Payload {
    /// An empty payload using the process default mappings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty payload using explicit mappings.
    #[must_use]
    pub fn with_mappings(mappings: Mappings) -> Self {
        Self {
            data: Map::new(),
            mappings,
            defaults: BTreeMap::new(),
        }
    }

    /// Wraps an existing mapping.
    #[must_use]
    pub fn from_map(data: Map) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Wraps a value, treating anything but a mapping as empty.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(data) => Self::from_map(data),
            _ => Self::new(),
        }
    }

    /// The alias configuration in use.
    #[must_use]
    pub const fn mappings(&self) -> &Mappings {
        &self.mappings
    }

    /// Replaces the alias configuration.
    ///
    /// Enabling a table has no effect while compact names are disabled for the
    /// process.
    pub fn set_mappings(&mut self, mappings: Mappings) -> &mut Self {
        if Mappings::compact_names_enabled() || !mappings.is_enabled() {
            self.mappings = mappings;
        }
        self
    }

    /// Replaces the default-value table, keyed by path text.
    pub fn set_defaults<I, K>(&mut self, defaults: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.defaults = defaults
            .into_iter()
            .map(|(path, value)| (path.into(), value))
            .collect();
        self
    }

    /// Returns the value at `path`, falling back to the defaults table.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotFound`] when neither the data nor the
    /// defaults hold the path.
    pub fn get<'p>(&self, path: impl Into<PathSpec<'p>>) -> Result<&Value, PayloadError> {
        let spec = path.into();
        self.lookup(spec)
            .ok_or_else(|| PayloadError::not_found(spec.as_str()))
    }

    /// Returns the value at `path`, or `default` when it is absent.
    ///
    /// An explicit default takes precedence over the defaults table.
    #[must_use]
    pub fn get_or<'s, 'p>(&'s self, path: impl Into<PathSpec<'p>>, default: &'s Value) -> &'s Value {
        path::get_path(&self.data, path.into(), &self.mappings).unwrap_or(default)
    }

    /// Returns the value at `path` when present in the data or defaults.
    #[must_use]
    pub fn get_opt<'p>(&self, path: impl Into<PathSpec<'p>>) -> Option<&Value> {
        self.lookup(path.into())
    }

    /// Returns the string at `path`, if it holds one.
    #[must_use]
    pub fn get_str<'p>(&self, path: impl Into<PathSpec<'p>>) -> Option<&str> {
        self.get_opt(path).and_then(Value::as_str)
    }

    /// Returns the mapping at `path`, if it holds one.
    #[must_use]
    pub fn get_map<'p>(&self, path: impl Into<PathSpec<'p>>) -> Option<&Map> {
        self.get_opt(path).and_then(Value::as_object)
    }

    /// Resolves several paths at once.
    ///
    /// # Errors
    ///
    /// Fails with the first path that cannot be resolved.
    pub fn get_many<'p, I, P>(&self, paths: I) -> Result<Vec<&Value>, PayloadError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathSpec<'p>>,
    {
        paths.into_iter().map(|path| self.get(path)).collect()
    }

    /// Reports whether `path` resolves, counting the defaults table.
    #[must_use]
    pub fn path_exists<'p>(&self, path: impl Into<PathSpec<'p>>) -> bool {
        self.lookup(path.into()).is_some()
    }

    /// Stores `value` at `path`, creating intermediate mappings.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotTraversable`] when an intermediate segment
    /// holds a non-mapping value.
    pub fn set<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PayloadError> {
        path::set_path(&mut self.data, path.into(), value.into(), &self.mappings)?;
        Ok(self)
    }

    /// Stores several `(path, value)` pairs in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing [`Payload::set`].
    pub fn set_many<I, K, V>(&mut self, values: I) -> Result<&mut Self, PayloadError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (path, value) in values {
            self.set(path.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Appends `value` to the list at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotAList`] when the leaf exists and is not a
    /// list, or [`PayloadError::NotTraversable`] for a blocked parent.
    pub fn push<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: impl Into<Value>,
    ) -> Result<&mut Self, PayloadError> {
        path::push_path(&mut self.data, path.into(), value.into(), &self.mappings)?;
        Ok(self)
    }

    /// Deep-merges `value` into the mapping at `path`, extending lists.
    ///
    /// The mapping is created when the path is absent.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::NotAMap`] when the path holds a non-mapping.
    pub fn merge<'p>(
        &mut self,
        path: impl Into<PathSpec<'p>>,
        value: &Map,
    ) -> Result<&mut Self, PayloadError> {
        let spec = path.into();
        if !path::path_exists(&self.data, spec, &self.mappings) {
            path::set_path(&mut self.data, spec, Value::Object(Map::new()), &self.mappings)?;
        }

        match path::get_path_mut(&mut self.data, spec, &self.mappings) {
            Some(Value::Object(target)) => {
                path::merge(value, target, &self.mappings, true);
                Ok(self)
            }
            _ => Err(PayloadError::NotAMap {
                path: spec.as_str().to_owned(),
            }),
        }
    }

    /// Removes the value at `path`, pruning parents left empty.
    pub fn delete<'p>(&mut self, path: impl Into<PathSpec<'p>>) -> bool {
        path::delete_path(&mut self.data, path.into(), &self.mappings)
    }

    /// Wraps the whole payload under the top-level key `name`.
    #[must_use]
    pub fn entity(self, name: &str) -> Self {
        let mut data = Map::new();
        data.insert(self.mappings.resolve(name).to_owned(), Value::Object(self.data));
        Self {
            data,
            mappings: self.mappings,
            defaults: BTreeMap::new(),
        }
    }

    /// Borrows the underlying mapping.
    #[must_use]
    pub const fn as_map(&self) -> &Map {
        &self.data
    }

    /// Consumes the payload, returning the underlying mapping.
    #[must_use]
    pub fn into_map(self) -> Map {
        self.data
    }

    /// Consumes the payload, returning it as a JSON-model value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }

    /// Returns `true` when no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn lookup(&self, spec: PathSpec<'_>) -> Option<&Value> {
        path::get_path(&self.data, spec, &self.mappings)
            .or_else(|| self.defaults.get(spec.as_str()))
    }
}

impl From<Map> for Payload {
    fn from(data: Map) -> Self {
        Self::from_map(data)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.into_value()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from_map)
    }
}
