//! The Response API handed to response middlewares.

use katana_payload::{Entity, Payload, ResponsePayload};

use super::base::Api;
use super::http::{HttpRequest, HttpResponse, multi_map_to_wire};
use super::transport::Transport;

/// Response API handed to response middlewares.
///
/// The HTTP response may be amended; the Transport returned by the services
/// is read-only.
#[derive(Debug, Clone)]
pub struct Response {
    api: Api,
    http_request: Option<HttpRequest>,
    http: HttpResponse,
    transport: Transport,
}

impl Response {
    /// A response with an empty Transport.
    #[must_use]
    pub fn new(api: Api, http: HttpResponse) -> Self {
        Self {
            api,
            http_request: None,
            http,
            transport: Transport::default(),
        }
    }

    /// Attaches the originating HTTP request.
    #[must_use]
    pub fn with_http_request(mut self, http: HttpRequest) -> Self {
        self.http_request = Some(http);
        self
    }

    /// Attaches the Transport returned by the services.
    #[must_use]
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Reads the `request`, `response` and `transport` regions of a
    /// middleware command.
    #[must_use]
    pub fn from_arguments(api: Api, arguments: &Payload) -> Self {
        let region = |name: &str| arguments.get_map(name).cloned().map(Payload::from_map);
        let http = HttpResponse::from_payload(&region("response").unwrap_or_default());
        let transport = Transport::from_payload(region("transport").unwrap_or_default());
        let mut response = Self::new(api, http).with_transport(transport);
        if let Some(request) = region("request") {
            response = response.with_http_request(HttpRequest::from_payload(&request));
        }
        response
    }

    /// Component API.
    #[must_use]
    pub fn api(&self) -> &Api {
        &self.api
    }

    /// The HTTP request, when the gateway forwarded it.
    #[must_use]
    pub fn http_request(&self) -> Option<&HttpRequest> {
        self.http_request.as_ref()
    }

    /// The HTTP response.
    #[must_use]
    pub fn http_response(&self) -> &HttpResponse {
        &self.http
    }

    /// The HTTP response, for amendment.
    pub fn http_response_mut(&mut self) -> &mut HttpResponse {
        &mut self.http
    }

    /// The Transport returned by the services.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The `response` entity sent back to the gateway.
    #[must_use]
    pub fn into_reply(self) -> Payload {
        let status = self.http.status();
        ResponsePayload::new(
            Some(self.http.protocol_version()),
            Some(&status),
            Some(self.http.body()),
            Some(multi_map_to_wire(self.http.headers())),
        )
        .entity()
    }
}
