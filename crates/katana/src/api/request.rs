//! The Request API handed to request middlewares.

use katana_payload::param::DEFAULT_LOCATION;
use katana_payload::{Entity, Param, ParamError, ParamType, Payload, ServiceCallPayload, Value};

use super::base::Api;
use super::http::{HttpRequest, HttpResponse};
use super::response::Response;

/// Request API handed to request middlewares.
///
/// A middleware may retarget the call by changing the service, version,
/// action or parameters, or answer directly through [`Request::new_response`].
#[derive(Debug, Clone)]
pub struct Request {
    api: Api,
    http: HttpRequest,
    service_name: String,
    service_version: String,
    action_name: String,
    params: Vec<Param>,
}

impl Request {
    /// A request targeting no service yet.
    #[must_use]
    pub fn new(api: Api, http: HttpRequest) -> Self {
        Self {
            api,
            http,
            service_name: String::new(),
            service_version: String::new(),
            action_name: String::new(),
            params: Vec::new(),
        }
    }

    /// Reads the `request` and `call` regions of a middleware command.
    #[must_use]
    pub fn from_arguments(api: Api, arguments: &Payload) -> Self {
        let request = Payload::from_map(arguments.get_map("request").cloned().unwrap_or_default());
        let call = Payload::from_map(arguments.get_map("call").cloned().unwrap_or_default());
        let mut built = Self::new(api, HttpRequest::from_payload(&request));
        call.get_str("service")
            .unwrap_or_default()
            .clone_into(&mut built.service_name);
        call.get_str("version")
            .unwrap_or_default()
            .clone_into(&mut built.service_version);
        call.get_str("action")
            .unwrap_or_default()
            .clone_into(&mut built.action_name);
        if let Some(params) = call.get_opt("params").and_then(Value::as_array) {
            built.params = params
                .iter()
                .map(|raw| Param::from_payload(DEFAULT_LOCATION, &Payload::from_value(raw.clone())))
                .collect();
        }
        built
    }

    /// Component API.
    #[must_use]
    pub fn api(&self) -> &Api {
        &self.api
    }

    /// The HTTP request.
    #[must_use]
    pub fn http_request(&self) -> &HttpRequest {
        &self.http
    }

    /// Target service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Retargets the call to another service.
    pub fn set_service_name(&mut self, service: &str) -> &mut Self {
        service.clone_into(&mut self.service_name);
        self
    }

    /// Target service version.
    #[must_use]
    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// Retargets the call to another version.
    pub fn set_service_version(&mut self, version: &str) -> &mut Self {
        version.clone_into(&mut self.service_version);
        self
    }

    /// Target action name.
    #[must_use]
    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Retargets the call to another action.
    pub fn set_action_name(&mut self, action: &str) -> &mut Self {
        action.clone_into(&mut self.action_name);
        self
    }

    /// Reports whether the call carries the parameter.
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

    /// Every call parameter.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Adds or replaces a call parameter.
    pub fn set_param(&mut self, param: Param) -> &mut Self {
        match self
            .params
            .iter_mut()
            .find(|known| known.name() == param.name())
        {
            Some(known) => *known = param,
            None => self.params.push(param),
        }
        self
    }

    /// Creates a parameter, inferring the type when `kind` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::TypeMismatch`] when `value` is not of `kind`.
    pub fn new_param(
        &self,
        name: &str,
        value: &Value,
        kind: Option<ParamType>,
    ) -> Result<Param, ParamError> {
        Param::from_value(name, value, kind)
    }

    /// A response that ends the request before any service runs.
    #[must_use]
    pub fn new_response(&self, status_code: u16, status_text: &str) -> Response {
        let mut http = HttpResponse::new(status_code, status_text);
        http.set_protocol_version(self.http.protocol_version());
        Response::new(self.api.clone(), http).with_http_request(self.http.clone())
    }

    /// The `call` entity sent back to the gateway.
    #[must_use]
    pub fn into_reply(self) -> Payload {
        let params = self
            .params
            .iter()
            .map(|param| param.to_payload().into_value())
            .collect();
        ServiceCallPayload::new(
            &self.service_name,
            &self.service_version,
            &self.action_name,
            params,
        )
        .entity()
    }
}
