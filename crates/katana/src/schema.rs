//! Service schemas received from the platform.
//!
//! The gateway sends its service mappings alongside requests. Worker tasks in
//! one process share a [`SchemaRegistry`]; the mappings are replaced wholesale
//! when a request carries a new copy and are read-only otherwise.

use std::sync::{Arc, PoisonError, RwLock};

use katana_payload::{Map, ParamType, Payload, Value, nomap};
use thiserror::Error;

/// Errors raised while resolving schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// No schema exists for the service version.
    #[error("Cannot resolve schema for Service: \"{service}\" ({version})")]
    ServiceNotFound {
        /// Service name.
        service: String,
        /// Service version.
        version: String,
    },
    /// The service schema has no such action.
    #[error("Cannot resolve schema for action: {action}")]
    ActionNotFound {
        /// Action name.
        action: String,
    },
}

/// Process-wide holder of the latest service mappings.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    mappings: RwLock<Arc<Payload>>,
}

impl SchemaRegistry {
    /// A registry with no mappings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the mappings.
    pub fn update(&self, mappings: Payload) {
        let mut guard = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(mappings);
    }

    fn snapshot(&self) -> Arc<Payload> {
        let guard = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Reports whether any mappings were received.
    ///
    /// Components run outside the platform never receive them.
    #[must_use]
    pub fn has_mappings(&self) -> bool {
        !self.snapshot().is_empty()
    }

    /// Reports whether `path` resolves in the mappings.
    #[must_use]
    pub fn path_exists(&self, path: &str) -> bool {
        self.snapshot().path_exists(path)
    }

    /// Returns a copy of the value at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.snapshot().get_opt(path).cloned()
    }

    /// Resolves the schema for a service version.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ServiceNotFound`] when the mappings hold no entry.
    pub fn service(&self, service: &str, version: &str) -> Result<ServiceSchema, SchemaError> {
        let path = format!("{}/{}", nomap(service), nomap(version));
        let data = self
            .snapshot()
            .get_map(path.as_str())
            .cloned()
            .ok_or_else(|| SchemaError::ServiceNotFound {
                service: service.to_owned(),
                version: version.to_owned(),
            })?;
        Ok(ServiceSchema {
            name: service.to_owned(),
            version: version.to_owned(),
            data: Payload::from_map(data),
        })
    }
}

/// Schema of one service version.
#[derive(Debug, Clone)]
pub struct ServiceSchema {
    name: String,
    version: String,
    data: Payload,
}

impl ServiceSchema {
    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether the service runs a file server.
    #[must_use]
    pub fn has_file_server(&self) -> bool {
        self.data
            .get_opt("files")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Names of the actions the service declares.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.data
            .get_map("actions")
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reports whether the service declares `action`.
    #[must_use]
    pub fn has_action(&self, action: &str) -> bool {
        self.action_map(action).is_some()
    }

    /// Resolves the schema of `action`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ActionNotFound`] for undeclared actions.
    pub fn action(&self, action: &str) -> Result<ActionSchema, SchemaError> {
        let data = self
            .action_map(action)
            .ok_or_else(|| SchemaError::ActionNotFound {
                action: action.to_owned(),
            })?;
        Ok(ActionSchema {
            name: action.to_owned(),
            data: Payload::from_map(data.clone()),
        })
    }

    fn action_map(&self, action: &str) -> Option<&Map> {
        let path = format!("actions/{}", nomap(action));
        self.data.get_map(path.as_str())
    }
}

/// Schema of one action.
#[derive(Debug, Clone)]
pub struct ActionSchema {
    name: String,
    data: Payload,
}

impl ActionSchema {
    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the action declares a return value.
    #[must_use]
    pub fn has_return(&self) -> bool {
        self.data.path_exists("return")
    }

    /// Declared return type; untyped or unknown declarations read as strings.
    #[must_use]
    pub fn return_type(&self) -> Option<ParamType> {
        if !self.has_return() {
            return None;
        }
        let declared = self.data.get_str("return/type").unwrap_or_default();
        Some(declared.parse().unwrap_or_default())
    }

    /// Reports whether the action may call `service` `version` `action`.
    #[must_use]
    pub fn has_call(&self, service: &str, version: &str, action: &str) -> bool {
        let Some(calls) = self.data.get_opt("calls").and_then(Value::as_array) else {
            return false;
        };
        calls.iter().any(|call| {
            call.as_array().is_some_and(|parts| {
                parts.len() == 3
                    && parts
                        .iter()
                        .zip([service, version, action])
                        .all(|(part, expected)| part.as_str() == Some(expected))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry.update(Payload::from_value(json!({
            "users": {
                "1.0.0": {
                    "files": true,
                    "actions": {
                        "read": {
                            "return": {"type": "integer"},
                            "calls": [["posts", "1.2.0", "list"]]
                        },
                        "list": {}
                    }
                }
            }
        })));
        registry
    }

    #[test]
    fn empty_registries_have_no_mappings() {
        let registry = SchemaRegistry::new();
        assert!(!registry.has_mappings());
        assert_eq!(
            registry.service("users", "1.0.0").expect_err("no schema"),
            SchemaError::ServiceNotFound {
                service: "users".to_owned(),
                version: "1.0.0".to_owned(),
            }
        );
    }

    #[rstest]
    fn services_resolve_by_name_and_version(registry: SchemaRegistry) {
        assert!(registry.has_mappings());
        assert!(registry.path_exists("users/1.0.0/files"));
        let service = registry.service("users", "1.0.0").expect("service");
        assert!(service.has_file_server());
        let mut actions = service.actions();
        actions.sort();
        assert_eq!(actions, ["list", "read"]);
        assert!(registry.service("users", "2.0.0").is_err());
    }

    #[rstest]
    fn actions_expose_returns_and_calls(registry: SchemaRegistry) {
        let service = registry.service("users", "1.0.0").expect("service");
        let read = service.action("read").expect("read");
        assert!(read.has_return());
        assert_eq!(read.return_type(), Some(ParamType::Integer));
        assert!(read.has_call("posts", "1.2.0", "list"));
        assert!(!read.has_call("posts", "1.2.0", "read"));

        let list = service.action("list").expect("list");
        assert!(!list.has_return());
        assert_eq!(list.return_type(), None);
        assert!(matches!(
            service.action("write"),
            Err(SchemaError::ActionNotFound { .. })
        ));
    }
}
