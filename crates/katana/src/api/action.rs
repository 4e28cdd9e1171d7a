//! The Action API handed to service handlers.

use katana_payload::param::DEFAULT_LOCATION;
use katana_payload::{
    Entity, ErrorPayload, File, FileError, Map, Param, ParamError, ParamType, PathSpec, Payload,
    PayloadError, TransportPayload, Value, nomap,
};
use serde_json::json;
use thiserror::Error;

use super::base::Api;
use crate::schema::{ActionSchema, ServiceSchema};

/// Scheme prefix of gateway addresses in other realms.
const REMOTE_SCHEME: &str = "ktp://";

pub(crate) const PATH_DELIMITER: char = '|';

/// Errors raised by [`Action`] operations.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The service has no file server for local files.
    #[error("File server not configured: \"{service}\" ({version})")]
    NoFileServer {
        /// Service name.
        service: String,
        /// Service version.
        version: String,
    },
    /// The called service has no schema.
    #[error("Service not found: \"{service}\" ({version})")]
    ServiceNotFound {
        /// Service name.
        service: String,
        /// Service version.
        version: String,
    },
    /// The action declares no return value.
    #[error("Cannot set a return value in \"{service}\" ({version}) for action: \"{action}\"")]
    UndefinedReturnValue {
        /// Service name.
        service: String,
        /// Service version.
        version: String,
        /// Action name.
        action: String,
    },
    /// The return value does not match the declared type.
    #[error("Invalid return type given in \"{service}\" ({version}) for action: \"{action}\"")]
    ReturnType {
        /// Service name.
        service: String,
        /// Service version.
        version: String,
        /// Action name.
        action: String,
    },
    /// The action schema does not declare the call.
    #[error(
        "Call not configured, connection to action on \"{service}\" ({version}) aborted: \"{action}\""
    )]
    CallNotConfigured {
        /// Called service.
        service: String,
        /// Called version.
        version: String,
        /// Called action.
        action: String,
    },
    /// The called action declares no return value.
    #[error("Cannot return value from \"{service}\" ({version}) for action: \"{action}\"")]
    ReturnNotConfigured {
        /// Called service.
        service: String,
        /// Called version.
        version: String,
        /// Called action.
        action: String,
    },
    /// A run-time call referenced a local file.
    #[error(
        "Cannot reference local file, connection to action on \"{service}\" ({version}) aborted: \"{action}\""
    )]
    LocalFile {
        /// Called service.
        service: String,
        /// Called version.
        version: String,
        /// Called action.
        action: String,
    },
    /// A parameter value does not match its declared type.
    #[error(transparent)]
    InvalidValue {
        /// Underlying parameter error.
        #[from]
        source: ParamError,
    },
    /// A file descriptor was rejected.
    #[error(transparent)]
    File {
        /// Underlying file error.
        #[from]
        source: FileError,
    },
    /// The Transport could not be written.
    #[error("failed to update transport: {source}")]
    Transport {
        /// Underlying payload error.
        #[from]
        source: PayloadError,
    },
}

fn target(service: &str, version: &str, action: &str) -> (String, String, String) {
    (service.to_owned(), version.to_owned(), action.to_owned())
}

fn params_value(params: &[Param]) -> Value {
    Value::Array(
        params
            .iter()
            .map(|param| param.to_payload().into_value())
            .collect(),
    )
}

/// Service-side view of one action invocation.
///
/// Every mutator writes into the Transport that is returned to the gateway
/// once the handler finishes; branches are keyed by the gateway public address
/// and never overwrite sibling branches.
#[derive(Debug, Clone)]
pub struct Action {
    api: Api,
    action: String,
    params: Vec<Param>,
    transport: TransportPayload,
    public_address: String,
    files: Map,
    schema: Option<ServiceSchema>,
    action_schema: Option<ActionSchema>,
    return_value: Option<Value>,
}

impl Action {
    /// Builds the action view for a command.
    ///
    /// `params` are the `{name, value, type}` entries sent by the gateway;
    /// later duplicates replace earlier ones. Schemas that cannot be resolved
    /// leave the action permissive.
    #[must_use]
    pub fn new(api: Api, action: &str, params: &[Value], transport: TransportPayload) -> Self {
        let mut decoded: Vec<Param> = Vec::with_capacity(params.len());
        for raw in params {
            let param = Param::from_payload(DEFAULT_LOCATION, &Payload::from_value(raw.clone()));
            match decoded.iter_mut().find(|known| known.name() == param.name()) {
                Some(known) => *known = param,
                None => decoded.push(param),
            }
        }

        let public_address = transport.public_address().to_owned();
        let files_path = format!(
            "files|{public_address}|{}|{}|{}",
            nomap(api.name()),
            api.version(),
            nomap(action)
        );
        let files = transport
            .get_map(PathSpec::with_delimiter(&files_path, PATH_DELIMITER))
            .cloned()
            .unwrap_or_default();

        let schema = api.service_schema(api.name(), api.version()).ok();
        let action_schema = schema.as_ref().and_then(|schema| schema.action(action).ok());
        let return_value = action_schema
            .as_ref()
            .and_then(ActionSchema::return_type)
            .map(ParamType::default_value);

        Self {
            api,
            action: action.to_owned(),
            params: decoded,
            transport,
            public_address,
            files,
            schema,
            action_schema,
            return_value,
        }
    }

    /// Component API.
    #[must_use]
    pub fn api(&self) -> &Api {
        &self.api
    }

    /// Name of the running action.
    #[must_use]
    pub fn action_name(&self) -> &str {
        &self.action
    }

    /// The Transport as modified so far.
    #[must_use]
    pub fn transport(&self) -> &TransportPayload {
        &self.transport
    }

    /// Value returned to the caller, present when the action declares one.
    #[must_use]
    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    /// Releases the Transport and the return value.
    #[must_use]
    pub fn into_parts(self) -> (TransportPayload, Option<Value>) {
        (self.transport, self.return_value)
    }

    /// Reports whether this action originated the request.
    #[must_use]
    pub fn is_origin(&self) -> bool {
        let expected = json!([self.api.name(), self.api.version(), self.action]);
        self.transport.get_opt("meta/origin") == Some(&expected)
    }

    /// Sets a userland property on the Transport.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<&mut Self, ActionError> {
        let path = format!("meta/properties/{}", nomap(name));
        self.transport.set(path.as_str(), value)?;
        Ok(self)
    }

    /// Reports whether the parameter was sent.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|param| param.name() == name)
    }

    /// The named parameter, or an empty one marked as missing.
    #[must_use]
    pub fn param(&self, name: &str) -> Param {
        self.params
            .iter()
            .find(|param| param.name() == name)
            .cloned()
            .unwrap_or_else(|| Param::missing(name))
    }

    /// Every parameter sent.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Creates a parameter, inferring the type when `kind` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::InvalidValue`] when `value` is not of `kind`.
    pub fn new_param(
        &self,
        name: &str,
        value: &Value,
        kind: Option<ParamType>,
    ) -> Result<Param, ActionError> {
        Ok(Param::from_value(name, value, kind)?)
    }

    /// Reports whether a file was sent under `name`.
    #[must_use]
    pub fn has_file(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// The named file.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::File`] when the descriptor is malformed.
    pub fn file(&self, name: &str) -> Result<Option<File>, ActionError> {
        let Some(Value::Object(descriptor)) = self.files.get(name) else {
            return Ok(None);
        };
        let file = File::from_payload(name, &Payload::from_map(descriptor.clone()))?;
        Ok(Some(file))
    }

    /// Every file sent.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::File`] for the first malformed descriptor.
    pub fn files(&self) -> Result<Vec<File>, ActionError> {
        self.files
            .keys()
            .filter_map(|name| self.file(name).transpose())
            .collect()
    }

    /// Describes a file to send.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::File`] unless `path` is a `file://` or
    /// `http://` URI.
    pub fn new_file(&self, name: &str, path: &str, mime: Option<&str>) -> Result<File, ActionError> {
        let file = File::new(name, path)?;
        Ok(match mime {
            Some(mime) => file.with_mime(mime),
            None => file,
        })
    }

    /// Registers `file` as the response download.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NoFileServer`] when mappings are known and the
    /// service runs no file server.
    pub fn set_download(&mut self, file: &File) -> Result<&mut Self, ActionError> {
        let schemas = self.api.schemas();
        if schemas.has_mappings() {
            let serves_files = self
                .api
                .service_schema(self.api.name(), self.api.version())
                .is_ok_and(|schema| schema.has_file_server());
            if !serves_files {
                return Err(self.no_file_server());
            }
        }
        self.transport.set("body", file.to_payload().into_value())?;
        Ok(self)
    }

    /// Sets the value returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::UndefinedReturnValue`] when the action declares
    /// no return and [`ActionError::ReturnType`] when `value` is neither null
    /// nor of the declared type.
    pub fn set_return(&mut self, value: Value) -> Result<&mut Self, ActionError> {
        let (service, version, action) = target(self.api.name(), self.api.version(), &self.action);
        let Some(expected) = self
            .action_schema
            .as_ref()
            .and_then(ActionSchema::return_type)
        else {
            return Err(ActionError::UndefinedReturnValue {
                service,
                version,
                action,
            });
        };
        if !value.is_null() && !expected.matches(&value) {
            return Err(ActionError::ReturnType {
                service,
                version,
                action,
            });
        }
        self.return_value = Some(value);
        Ok(self)
    }

    fn own_branch(&self, region: &str) -> String {
        format!(
            "{region}|{}|{}|{}|{}",
            self.public_address,
            nomap(self.api.name()),
            self.api.version(),
            nomap(&self.action)
        )
    }

    /// Adds an entity to the action data.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn set_entity(&mut self, entity: Map) -> Result<&mut Self, ActionError> {
        let path = self.own_branch("data");
        self.transport
            .push(PathSpec::with_delimiter(&path, PATH_DELIMITER), entity)?;
        Ok(self)
    }

    /// Adds a collection of entities to the action data.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn set_collection(&mut self, collection: Vec<Map>) -> Result<&mut Self, ActionError> {
        let path = self.own_branch("data");
        let collection: Vec<Value> = collection.into_iter().map(Value::Object).collect();
        self.transport
            .push(PathSpec::with_delimiter(&path, PATH_DELIMITER), collection)?;
        Ok(self)
    }

    fn relate(
        &mut self,
        primary_key: &str,
        address: Option<&str>,
        service: &str,
        foreign: Value,
    ) -> Result<&mut Self, ActionError> {
        let path = format!(
            "relations|{}|{}|{}|{}|{}",
            self.public_address,
            nomap(self.api.name()),
            nomap(primary_key),
            address.unwrap_or(&self.public_address),
            nomap(service)
        );
        self.transport
            .set(PathSpec::with_delimiter(&path, PATH_DELIMITER), foreign)?;
        Ok(self)
    }

    /// Relates the entity `primary_key` to one entity of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn relate_one(
        &mut self,
        primary_key: &str,
        service: &str,
        foreign_key: impl Into<Value>,
    ) -> Result<&mut Self, ActionError> {
        self.relate(primary_key, None, service, foreign_key.into())
    }

    /// Relates the entity `primary_key` to several entities of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn relate_many(
        &mut self,
        primary_key: &str,
        service: &str,
        foreign_keys: Vec<Value>,
    ) -> Result<&mut Self, ActionError> {
        self.relate(primary_key, None, service, Value::Array(foreign_keys))
    }

    /// Relates to one entity of a service behind another gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn relate_one_remote(
        &mut self,
        primary_key: &str,
        address: &str,
        service: &str,
        foreign_key: impl Into<Value>,
    ) -> Result<&mut Self, ActionError> {
        self.relate(primary_key, Some(address), service, foreign_key.into())
    }

    /// Relates to several entities of a service behind another gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn relate_many_remote(
        &mut self,
        primary_key: &str,
        address: &str,
        service: &str,
        foreign_keys: Vec<Value>,
    ) -> Result<&mut Self, ActionError> {
        self.relate(primary_key, Some(address), service, Value::Array(foreign_keys))
    }

    /// Sets the URI of a named link.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn set_link(&mut self, link: &str, uri: &str) -> Result<&mut Self, ActionError> {
        let path = format!(
            "links|{}|{}|{}",
            self.public_address,
            nomap(self.api.name()),
            nomap(link)
        );
        self.transport
            .set(PathSpec::with_delimiter(&path, PATH_DELIMITER), uri)?;
        Ok(self)
    }

    fn transaction(
        &mut self,
        kind: &str,
        callee: &str,
        params: &[Param],
    ) -> Result<&mut Self, ActionError> {
        let mut entry = Payload::new();
        entry.set_many([
            ("name", self.api.name()),
            ("version", self.api.version()),
            ("action", self.action.as_str()),
            ("callee", callee),
        ])?;
        if !params.is_empty() {
            entry.set("params", params_value(params))?;
        }
        let path = format!("transactions/{kind}");
        self.transport.push(path.as_str(), entry.into_value())?;
        Ok(self)
    }

    /// Registers `callee` to run when the request succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn commit(&mut self, callee: &str, params: &[Param]) -> Result<&mut Self, ActionError> {
        self.transaction("commit", callee, params)
    }

    /// Registers `callee` to run when the request fails.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn rollback(&mut self, callee: &str, params: &[Param]) -> Result<&mut Self, ActionError> {
        self.transaction("rollback", callee, params)
    }

    /// Registers `callee` to run once the request finishes either way.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn complete(&mut self, callee: &str, params: &[Param]) -> Result<&mut Self, ActionError> {
        self.transaction("complete", callee, params)
    }

    fn files_to_payload(&self, files: &[File]) -> Result<Map, ActionError> {
        let serves_files = self
            .schema
            .as_ref()
            .is_none_or(ServiceSchema::has_file_server);
        let mut payload = Map::new();
        for file in files {
            if file.is_local() && !serves_files {
                return Err(self.no_file_server());
            }
            payload.insert(file.name().to_owned(), file.to_payload().into_value());
        }
        Ok(payload)
    }

    fn attach_files(
        &mut self,
        service: &str,
        version: &str,
        action: &str,
        files: &[File],
    ) -> Result<(), ActionError> {
        if files.is_empty() {
            return Ok(());
        }
        let payload = self.files_to_payload(files)?;
        let path = format!(
            "files|{}|{}|{version}|{}",
            self.public_address,
            nomap(service),
            nomap(action)
        );
        self.transport.set(
            PathSpec::with_delimiter(&path, PATH_DELIMITER),
            Value::Object(payload),
        )?;
        Ok(())
    }

    fn push_call(&mut self, call: Payload) -> Result<(), ActionError> {
        let path = format!("calls/{}/{}", nomap(self.api.name()), self.api.version());
        self.transport.push(path.as_str(), call.into_value())?;
        Ok(())
    }

    /// Registers a call to run after this action returns.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NoFileServer`] when local files are attached
    /// and the service runs no file server.
    pub fn defer_call(
        &mut self,
        service: &str,
        version: &str,
        action: &str,
        params: &[Param],
        files: &[File],
    ) -> Result<&mut Self, ActionError> {
        self.attach_files(service, version, action, files)?;
        let mut call = Payload::new();
        call.set_many([("name", service), ("version", version), ("action", action)])?;
        if !params.is_empty() {
            call.set("params", params_value(params))?;
        }
        self.push_call(call)?;
        Ok(self)
    }

    /// Registers a call to a service behind the gateway at `address`.
    ///
    /// The address gains a `ktp://` prefix when it lacks one.
    ///
    /// # Errors
    ///
    /// Same as [`Action::defer_call`].
    #[expect(
        clippy::too_many_arguments,
        reason = "mirrors the remote call descriptor fields"
    )]
    pub fn remote_call(
        &mut self,
        address: &str,
        service: &str,
        version: &str,
        action: &str,
        params: &[Param],
        files: &[File],
        timeout: Option<u64>,
    ) -> Result<&mut Self, ActionError> {
        let gateway = if address.starts_with("ktp") {
            address.to_owned()
        } else {
            format!("{REMOTE_SCHEME}{address}")
        };
        self.attach_files(service, version, action, files)?;
        let mut call = Payload::new();
        call.set_many([
            ("gateway", gateway.as_str()),
            ("name", service),
            ("version", version),
            ("action", action),
        ])?;
        if let Some(timeout) = timeout.filter(|timeout| *timeout > 0) {
            call.set("timeout", timeout)?;
        }
        if !params.is_empty() {
            call.set("params", params_value(params))?;
        }
        self.push_call(call)?;
        Ok(self)
    }

    /// Checks that a run-time call to `service` is declared and returns a value.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::LocalFile`] when a local file is attached,
    /// [`ActionError::CallNotConfigured`] when the action schema does not
    /// declare the call, [`ActionError::ServiceNotFound`] when the callee has
    /// no schema and [`ActionError::ReturnNotConfigured`] when the callee
    /// returns nothing.
    pub fn check_call(
        &self,
        service: &str,
        version: &str,
        action: &str,
        files: &[File],
    ) -> Result<(), ActionError> {
        let callee = || target(service, version, action);
        if files.iter().any(File::is_local) {
            let (service, version, action) = callee();
            return Err(ActionError::LocalFile {
                service,
                version,
                action,
            });
        }
        let declared = self
            .action_schema
            .as_ref()
            .is_some_and(|schema| schema.has_call(service, version, action));
        if !declared {
            let (service, version, action) = callee();
            return Err(ActionError::CallNotConfigured {
                service,
                version,
                action,
            });
        }
        let returns = if service == self.api.name() && version == self.api.version() {
            self.action_schema
                .as_ref()
                .is_some_and(ActionSchema::has_return)
        } else {
            let schema = self.api.service_schema(service, version).map_err(|_| {
                ActionError::ServiceNotFound {
                    service: service.to_owned(),
                    version: version.to_owned(),
                }
            })?;
            schema
                .action(action)
                .is_ok_and(|action_schema| action_schema.has_return())
        };
        if returns {
            Ok(())
        } else {
            let (service, version, action) = callee();
            Err(ActionError::ReturnNotConfigured {
                service,
                version,
                action,
            })
        }
    }

    /// Adds an error for this service to the Transport.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Transport`] when the Transport is malformed.
    pub fn error(
        &mut self,
        message: &str,
        code: Option<i64>,
        status: Option<&str>,
    ) -> Result<&mut Self, ActionError> {
        let path = format!(
            "errors|{}|{}|{}",
            self.public_address,
            nomap(self.api.name()),
            self.api.version()
        );
        let error = ErrorPayload::new(Some(message), code, status).materialise();
        self.transport.push(
            PathSpec::with_delimiter(&path, PATH_DELIMITER),
            error.into_payload().into_value(),
        )?;
        Ok(self)
    }

    fn no_file_server(&self) -> ActionError {
        ActionError::NoFileServer {
            service: self.api.name().to_owned(),
            version: self.api.version().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::ComponentInfo;
    use crate::schema::SchemaRegistry;
    use rstest::{fixture, rstest};

    fn api_with(mappings: Option<Value>) -> Api {
        let info = ComponentInfo {
            name: "users".to_owned(),
            version: "1.0.0".to_owned(),
            ..ComponentInfo::default()
        };
        let schemas = SchemaRegistry::new();
        if let Some(mappings) = mappings {
            schemas.update(Payload::from_value(mappings));
        }
        Api::new(Arc::new(info), Arc::new(schemas))
    }

    fn transport() -> TransportPayload {
        let mut transport = TransportPayload::new(
            "1.0.0",
            "req-1",
            vec![json!("users"), json!("1.0.0"), json!("read")],
            None,
            None,
        );
        transport
            .set("meta/gateway", json!(["internal:5000", "public:80"]))
            .expect("gateway");
        transport
    }

    #[fixture]
    fn mapped() -> Api {
        api_with(Some(json!({
            "users": {"1.0.0": {
                "files": false,
                "actions": {
                    "read": {
                        "return": {"type": "integer"},
                        "calls": [["posts", "1.2.0", "list"], ["posts", "1.2.0", "count"]]
                    },
                    "list": {}
                }
            }},
            "posts": {"1.2.0": {"actions": {"list": {}, "count": {"return": {"type": "integer"}}}}}
        })))
    }

    #[fixture]
    fn action(mapped: Api) -> Action {
        let params = [json!({"name": "id", "value": 7, "type": "integer"})];
        Action::new(mapped, "read", &params, transport())
    }

    fn branch<'a>(transport: &'a TransportPayload, path: &str) -> Option<&'a Value> {
        transport.get_opt(PathSpec::with_delimiter(path, '|'))
    }

    #[rstest]
    fn params_are_keyed_by_name(action: Action) {
        assert!(action.is_origin());
        assert!(action.has_param("id"));
        assert_eq!(action.param("id").value().expect("typed"), json!(7));
        let missing = action.param("name");
        assert!(!missing.exists());
        assert_eq!(action.params().len(), 1);
    }

    #[rstest]
    fn new_params_check_declared_types(action: Action) {
        let param = action
            .new_param("flag", &json!(true), None)
            .expect("inferred");
        assert_eq!(param.param_type(), ParamType::Boolean);
        assert!(matches!(
            action.new_param("flag", &json!("yes"), Some(ParamType::Integer)),
            Err(ActionError::InvalidValue { .. })
        ));
    }

    #[rstest]
    fn return_values_default_and_validate(mut action: Action) {
        assert_eq!(action.return_value(), Some(&json!(0)));
        action.set_return(json!(42)).expect("integer return");
        assert_eq!(action.return_value(), Some(&json!(42)));
        let error = action.set_return(json!("x")).expect_err("wrong type");
        assert_eq!(
            error.to_string(),
            "Invalid return type given in \"users\" (1.0.0) for action: \"read\""
        );
    }

    #[rstest]
    fn undeclared_returns_are_rejected(mapped: Api) {
        let mut action = Action::new(mapped, "list", &[], transport());
        assert!(action.return_value().is_none());
        assert!(matches!(
            action.set_return(json!(1)),
            Err(ActionError::UndefinedReturnValue { .. })
        ));
    }

    #[rstest]
    fn data_accumulates_under_the_public_address(mut action: Action) {
        let mut entity = Map::new();
        entity.insert("id".to_owned(), json!(1));
        action.set_entity(entity.clone()).expect("entity");
        action.set_collection(vec![entity]).expect("collection");
        let data = branch(action.transport(), "data|public:80|!users|1.0.0|!read")
            .and_then(Value::as_array)
            .expect("data list");
        assert_eq!(data.len(), 2);
        assert_eq!(data.get(1), Some(&json!([{"id": 1}])));
    }

    #[rstest]
    fn relations_and_links_use_escaped_keys(mut action: Action) {
        action.relate_one("7", "posts", "p1").expect("one");
        action
            .relate_many_remote("8", "ktp://other:80", "posts", vec![json!("p2")])
            .expect("many remote");
        action.set_link("self", "/users/7").expect("link");
        let transport = action.transport();
        assert_eq!(
            branch(transport, "relations|public:80|!users|!7|public:80|!posts"),
            Some(&json!("p1"))
        );
        assert_eq!(
            branch(transport, "relations|public:80|!users|!8|ktp://other:80|!posts"),
            Some(&json!(["p2"]))
        );
        assert_eq!(
            branch(transport, "links|public:80|!users|!self"),
            Some(&json!("/users/7"))
        );
    }

    #[rstest]
    fn transactions_record_the_caller(mut action: Action) {
        action.commit("save", &[]).expect("commit");
        let param = Param::new("query", "id", "7", ParamType::Integer);
        action.rollback("undo", &[param]).expect("rollback");
        let commits = action
            .transport()
            .get_opt("transactions/commit")
            .and_then(Value::as_array)
            .expect("commits");
        assert_eq!(commits.len(), 1);
        let commit = Payload::from_value(commits.first().cloned().expect("commit"));
        assert_eq!(commit.get_str("callee"), Some("save"));
        assert_eq!(commit.get_str("action"), Some("read"));
        assert!(!commit.path_exists("params"));
        assert!(action.transport().path_exists("transactions/rollback"));
    }

    #[rstest]
    fn deferred_and_remote_calls_accumulate(mut action: Action) {
        action
            .defer_call("posts", "1.2.0", "list", &[], &[])
            .expect("defer");
        action
            .remote_call("other:80", "posts", "1.2.0", "list", &[], &[], Some(500))
            .expect("remote");
        let calls = action
            .transport()
            .get_opt("calls/!users/1.0.0")
            .and_then(Value::as_array)
            .expect("calls");
        assert_eq!(calls.len(), 2);
        let remote = Payload::from_value(calls.get(1).cloned().expect("remote"));
        assert_eq!(remote.get_str("gateway"), Some("ktp://other:80"));
        assert_eq!(remote.get_opt("timeout"), Some(&json!(500)));
    }

    #[rstest]
    fn local_files_need_a_file_server(mut action: Action) {
        let file = action
            .new_file("avatar", "file:///tmp/avatar.png", Some("image/png"))
            .expect("file");
        let error = action
            .defer_call("posts", "1.2.0", "list", &[], &[file.clone()])
            .expect_err("no file server");
        assert_eq!(
            error.to_string(),
            "File server not configured: \"users\" (1.0.0)"
        );
        assert!(matches!(
            action.set_download(&file),
            Err(ActionError::NoFileServer { .. })
        ));
    }

    #[test]
    fn unmapped_components_are_permissive() {
        let mut action = Action::new(api_with(None), "read", &[], transport());
        let file = File::new("report", "file:///tmp/report.csv").expect("file");
        action
            .defer_call("posts", "1.2.0", "list", &[], &[file.clone()])
            .expect("files allowed");
        action.set_download(&file).expect("download allowed");
        assert!(action.transport().path_exists("body/path"));
        assert!(
            branch(action.transport(), "files|public:80|!posts|1.2.0|!list|!report").is_some()
        );
        assert!(action.return_value().is_none());
    }

    #[rstest]
    fn run_time_calls_are_checked_against_schemas(action: Action) {
        action
            .check_call("posts", "1.2.0", "count", &[])
            .expect("declared call");
        assert!(matches!(
            action.check_call("posts", "1.2.0", "list", &[]),
            Err(ActionError::ReturnNotConfigured { .. })
        ));
        assert!(matches!(
            action.check_call("posts", "1.2.0", "delete", &[]),
            Err(ActionError::CallNotConfigured { .. })
        ));
        let local = File::new("a", "file:///tmp/a").expect("file");
        assert!(matches!(
            action.check_call("posts", "1.2.0", "count", &[local]),
            Err(ActionError::LocalFile { .. })
        ));
    }

    #[rstest]
    fn errors_are_pushed_for_the_service(mut action: Action) {
        action.error("boom", Some(3), None).expect("error");
        let errors = branch(action.transport(), "errors|public:80|!users|1.0.0")
            .and_then(Value::as_array)
            .expect("errors");
        let error = ErrorPayload::from_payload(Payload::from_value(
            errors.first().cloned().expect("error"),
        ));
        assert_eq!(error.message(), "boom");
        assert_eq!(error.code(), 3);
        assert_eq!(error.status(), "500 Internal Server Error");
    }

    #[rstest]
    fn properties_land_in_transport_meta(mut action: Action) {
        action.set_property("locale", "en").expect("property");
        assert_eq!(
            action.transport().get_str("meta/properties/!locale"),
            Some("en")
        );
    }
}
