//! HTTP request and response data seen by middlewares.

use std::collections::BTreeMap;

use katana_payload::{File, Map, Payload, Value};
use tracing::warn;
use url::Url;

use super::API_TARGET;

/// Multi-valued fields such as query parameters and headers.
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// Protocol version assumed when the gateway sends none.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.1";

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Reads a `{name: [values]}` mapping; scalar values count as one value.
pub(crate) fn multi_map(data: Option<&Map>) -> MultiMap {
    let Some(data) = data else {
        return MultiMap::new();
    };
    data.iter()
        .map(|(name, values)| {
            let values = match values {
                Value::Array(values) => values.iter().map(text).collect(),
                value => vec![text(value)],
            };
            (name.clone(), values)
        })
        .collect()
}

/// Writes a [`MultiMap`] back to its wire mapping.
pub(crate) fn multi_map_to_wire(values: &MultiMap) -> Map {
    values
        .iter()
        .map(|(name, values)| {
            let values = values.iter().cloned().map(Value::from).collect();
            (name.clone(), Value::Array(values))
        })
        .collect()
}

fn first_or<'a>(values: &'a MultiMap, name: &str, default: &'a str) -> &'a str {
    values
        .get(name)
        .and_then(|values| values.first())
        .map_or(default, String::as_str)
}

fn firsts(values: &MultiMap) -> BTreeMap<String, String> {
    values
        .iter()
        .filter_map(|(name, values)| Some((name.clone(), values.first()?.clone())))
        .collect()
}

/// The HTTP request received by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    method: String,
    url: String,
    parsed: Option<Url>,
    protocol_version: String,
    query: MultiMap,
    post_data: MultiMap,
    headers: MultiMap,
    body: String,
    files: Vec<File>,
}

impl HttpRequest {
    /// A request for `method` on `url`.
    ///
    /// The method is upper-cased. URLs that do not parse leave the scheme,
    /// host and path empty.
    #[must_use]
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            url: url.to_owned(),
            parsed: Url::parse(url).ok(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            ..Self::default()
        }
    }

    /// Reads the `request` region of a middleware command.
    #[must_use]
    pub fn from_payload(request: &Payload) -> Self {
        let mut http = Self::new(
            request.get_str("method").unwrap_or_default(),
            request.get_str("url").unwrap_or_default(),
        );
        if let Some(version) = request.get_str("version").filter(|version| !version.is_empty()) {
            version.clone_into(&mut http.protocol_version);
        }
        http.query = multi_map(request.get_map("query"));
        http.post_data = multi_map(request.get_map("post_data"));
        http.headers = multi_map(request.get_map("headers"));
        request
            .get_str("body")
            .unwrap_or_default()
            .clone_into(&mut http.body);
        http.files = request
            .get_map("files")
            .map(files_from_wire)
            .unwrap_or_default();
        http
    }

    /// Replaces the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: &str) -> Self {
        version.clone_into(&mut self.protocol_version);
        self
    }

    /// Replaces the query parameters.
    #[must_use]
    pub fn with_query(mut self, query: MultiMap) -> Self {
        self.query = query;
        self
    }

    /// Replaces the form parameters.
    #[must_use]
    pub fn with_post_data(mut self, post_data: MultiMap) -> Self {
        self.post_data = post_data;
        self
    }

    /// Replaces the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: MultiMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: &str) -> Self {
        body.clone_into(&mut self.body);
        self
    }

    /// Reports whether the request used `method`, ignoring case.
    #[must_use]
    pub fn is_method(&self, method: &str) -> bool {
        self.method == method.to_uppercase()
    }

    /// Upper-cased HTTP method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Full request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// URL scheme.
    #[must_use]
    pub fn url_scheme(&self) -> &str {
        self.parsed.as_ref().map_or("", Url::scheme)
    }

    /// URL host, with the port when one was given.
    #[must_use]
    pub fn url_host(&self) -> String {
        let Some(parsed) = &self.parsed else {
            return String::new();
        };
        let host = parsed.host_str().unwrap_or_default();
        match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }

    /// URL path without trailing slashes.
    #[must_use]
    pub fn url_path(&self) -> &str {
        self.parsed
            .as_ref()
            .map_or("", |parsed| parsed.path().trim_end_matches('/'))
    }

    /// Reports whether the query string carries `name`.
    #[must_use]
    pub fn has_query_param(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }

    /// First value of a query parameter, or `default`.
    #[must_use]
    pub fn query_param<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        first_or(&self.query, name, default)
    }

    /// Every value of a query parameter.
    #[must_use]
    pub fn query_param_array(&self, name: &str) -> &[String] {
        self.query.get(name).map_or(&[], Vec::as_slice)
    }

    /// First value of every query parameter.
    #[must_use]
    pub fn query_params(&self) -> BTreeMap<String, String> {
        firsts(&self.query)
    }

    /// Every value of every query parameter.
    #[must_use]
    pub fn query_params_array(&self) -> &MultiMap {
        &self.query
    }

    /// Reports whether the form data carries `name`.
    #[must_use]
    pub fn has_post_param(&self, name: &str) -> bool {
        self.post_data.contains_key(name)
    }

    /// First value of a form parameter, or `default`.
    #[must_use]
    pub fn post_param<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        first_or(&self.post_data, name, default)
    }

    /// Every value of a form parameter.
    #[must_use]
    pub fn post_param_array(&self, name: &str) -> &[String] {
        self.post_data.get(name).map_or(&[], Vec::as_slice)
    }

    /// First value of every form parameter.
    #[must_use]
    pub fn post_params(&self) -> BTreeMap<String, String> {
        firsts(&self.post_data)
    }

    /// Every value of every form parameter.
    #[must_use]
    pub fn post_params_array(&self) -> &MultiMap {
        &self.post_data
    }

    /// Reports whether the request used protocol `version`.
    #[must_use]
    pub fn is_protocol_version(&self, version: &str) -> bool {
        self.protocol_version == version
    }

    /// HTTP protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Reports whether the header was sent.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Header values joined with `", "`, or `default` when absent.
    #[must_use]
    pub fn header(&self, name: &str, default: &str) -> String {
        self.headers
            .get(name)
            .map_or_else(|| default.to_owned(), |values| values.join(", "))
    }

    /// Every header.
    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    /// Reports whether the body has content.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Raw body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Reports whether a file was uploaded under `name`.
    #[must_use]
    pub fn has_file(&self, name: &str) -> bool {
        self.files.iter().any(|file| file.name() == name)
    }

    /// The first file uploaded under `name`.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.iter().find(|file| file.name() == name)
    }

    /// Every uploaded file.
    #[must_use]
    pub fn files(&self) -> &[File] {
        &self.files
    }
}

fn files_from_wire(files: &Map) -> Vec<File> {
    let mut decoded = Vec::new();
    for (name, descriptors) in files {
        let descriptors = match descriptors {
            Value::Array(list) => list.clone(),
            single => vec![single.clone()],
        };
        for descriptor in descriptors {
            match File::from_payload(name.as_str(), &Payload::from_value(descriptor)) {
                Ok(file) => decoded.push(file),
                Err(error) => warn!(target: API_TARGET, file = %name, %error, "skipping uploaded file"),
            }
        }
    }
    decoded
}

/// The HTTP response a middleware returns or amends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    protocol_version: String,
    status_code: u16,
    status_text: String,
    headers: MultiMap,
    body: String,
}

impl HttpResponse {
    /// A response with an empty body.
    #[must_use]
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            status_code,
            status_text: status_text.to_owned(),
            headers: MultiMap::new(),
            body: String::new(),
        }
    }

    /// Reads the `response` region of a middleware command.
    ///
    /// Unparseable status codes read as 500.
    #[must_use]
    pub fn from_payload(response: &Payload) -> Self {
        let status = response.get_str("status").unwrap_or_default();
        let (code, text) = status.split_once(' ').unwrap_or((status, ""));
        let mut http = Self::new(code.parse().unwrap_or(500), text);
        if let Some(version) = response.get_str("version").filter(|version| !version.is_empty()) {
            version.clone_into(&mut http.protocol_version);
        }
        http.headers = multi_map(response.get_map("headers"));
        response
            .get_str("body")
            .unwrap_or_default()
            .clone_into(&mut http.body);
        http
    }

    /// Reports whether the response uses protocol `version`.
    #[must_use]
    pub fn is_protocol_version(&self, version: &str) -> bool {
        self.protocol_version == version
    }

    /// HTTP protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Replaces the protocol version.
    pub fn set_protocol_version(&mut self, version: &str) -> &mut Self {
        version.clone_into(&mut self.protocol_version);
        self
    }

    /// Reports whether the status line equals `status`.
    #[must_use]
    pub fn is_status(&self, status: &str) -> bool {
        self.status() == status
    }

    /// Status line, such as `200 OK`.
    #[must_use]
    pub fn status(&self) -> String {
        format!("{} {}", self.status_code, self.status_text)
    }

    /// Numeric status code.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Status reason phrase.
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Replaces the status.
    pub fn set_status(&mut self, code: u16, text: &str) -> &mut Self {
        self.status_code = code;
        text.clone_into(&mut self.status_text);
        self
    }

    /// Reports whether the header is set.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    /// Header values joined with `", "`, or `default` when absent.
    #[must_use]
    pub fn header(&self, name: &str, default: &str) -> String {
        self.headers
            .get(name)
            .map_or_else(|| default.to_owned(), |values| values.join(", "))
    }

    /// Every header.
    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.headers
    }

    /// Appends a header value.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers
            .entry(name.to_owned())
            .or_default()
            .push(value.to_owned());
        self
    }

    /// Reports whether the body has content.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Raw body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: &str) -> &mut Self {
        body.clone_into(&mut self.body);
        self
    }
}
