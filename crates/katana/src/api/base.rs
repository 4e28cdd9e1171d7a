//! Component identity and platform state shared by every API object.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{SchemaError, SchemaRegistry, ServiceSchema};

/// Identity and settings of the running component.
///
/// Built once at startup and shared by every API object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Path of the component executable.
    pub path: String,
    /// Component name.
    pub name: String,
    /// Component version.
    pub version: String,
    /// Platform version.
    pub platform_version: String,
    /// Engine variables.
    pub variables: BTreeMap<String, String>,
    /// Whether debug behaviour is enabled.
    pub debug: bool,
}

/// State every handler-facing API object carries.
#[derive(Debug, Clone)]
pub struct Api {
    info: Arc<ComponentInfo>,
    schemas: Arc<SchemaRegistry>,
}

impl Api {
    /// Builds an API view over the component and its schemas.
    #[must_use]
    pub const fn new(info: Arc<ComponentInfo>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { info, schemas }
    }

    /// Whether debug behaviour is enabled.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.info.debug
    }

    /// Path of the component executable.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.info.path
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Component version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.info.version
    }

    /// Platform version.
    #[must_use]
    pub fn platform_version(&self) -> &str {
        &self.info.platform_version
    }

    /// All engine variables.
    #[must_use]
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.info.variables
    }

    /// Reports whether the variable is defined.
    #[must_use]
    pub fn has_variable(&self, name: &str) -> bool {
        self.info.variables.contains_key(name)
    }

    /// Value of a variable; empty when undefined.
    #[must_use]
    pub fn variable(&self, name: &str) -> &str {
        self.info
            .variables
            .get(name)
            .map_or("", String::as_str)
    }

    /// Schema registry shared by the process.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Resolves the schema of a service version.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ServiceNotFound`] when no mappings describe it.
    pub fn service_schema(&self, service: &str, version: &str) -> Result<ServiceSchema, SchemaError> {
        self.schemas.service(service, version)
    }
}
