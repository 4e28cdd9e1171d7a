//! Read-only view of a Transport.

use katana_payload::{File, FileError, Map, Payload, TransportPayload, Value, nomap};
use serde_json::json;

/// Read-only Transport handed to response middlewares.
#[derive(Debug, Clone, Default)]
pub struct Transport {
    payload: TransportPayload,
}

fn empty() -> Value {
    json!({})
}

/// Descends through literal keys, stopping at the first absent one.
fn branch(root: Option<&Value>, keys: &[Option<&str>]) -> Value {
    let mut current = match root {
        Some(value) => value,
        None => return empty(),
    };
    for key in keys.iter().map_while(|key| *key) {
        match current.get(key) {
            Some(next) => current = next,
            None => return empty(),
        }
    }
    current.clone()
}

impl Transport {
    /// Wraps Transport data.
    #[must_use]
    pub fn new(payload: TransportPayload) -> Self {
        Self { payload }
    }

    /// Wraps raw Transport data, defaulting every region to empty.
    #[must_use]
    pub fn from_payload(payload: Payload) -> Self {
        Self::new(TransportPayload::from_payload(payload))
    }

    /// The underlying payload.
    #[must_use]
    pub fn payload(&self) -> &TransportPayload {
        &self.payload
    }

    /// Request identifier.
    #[must_use]
    pub fn request_id(&self) -> &str {
        self.payload.get_str("meta/id").unwrap_or_default()
    }

    /// Request timestamp as sent by the gateway.
    #[must_use]
    pub fn request_timestamp(&self) -> &str {
        self.payload.get_str("meta/datetime").unwrap_or_default()
    }

    /// Service that originated the request: name, version and action.
    #[must_use]
    pub fn origin_service(&self) -> Vec<Value> {
        self.payload
            .get_opt("meta/origin")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// A userland property, or `default` when unset.
    #[must_use]
    pub fn property<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        let path = format!("meta/properties/{}", nomap(name));
        self.payload.get_str(path.as_str()).unwrap_or(default)
    }

    /// All userland properties.
    #[must_use]
    pub fn properties(&self) -> Map {
        self.payload
            .get_map("meta/properties")
            .cloned()
            .unwrap_or_default()
    }

    /// Reports whether a download was registered.
    #[must_use]
    pub fn has_download(&self) -> bool {
        self.payload
            .get_map("body")
            .is_some_and(|body| !body.is_empty())
    }

    /// The registered download.
    ///
    /// # Errors
    ///
    /// Returns a [`FileError`] when the stored descriptor is malformed.
    pub fn download(&self) -> Result<Option<File>, FileError> {
        if !self.has_download() {
            return Ok(None);
        }
        let body = Payload::from_map(self.payload.get_map("body").cloned().unwrap_or_default());
        File::from_payload("download", &body).map(Some)
    }

    /// Entity data, optionally narrowed to an address, service and version.
    ///
    /// Keys are applied in order until the first `None`.
    #[must_use]
    pub fn data(&self, address: Option<&str>, service: Option<&str>, version: Option<&str>) -> Value {
        branch(self.payload.get_opt("data"), &[address, service, version])
    }

    /// Relations, optionally for one address.
    #[must_use]
    pub fn relations(&self, address: Option<&str>) -> Value {
        branch(self.payload.get_opt("relations"), &[address])
    }

    /// Links, optionally for one address.
    #[must_use]
    pub fn links(&self, address: Option<&str>) -> Value {
        branch(self.payload.get_opt("links"), &[address])
    }

    /// Deferred calls, optionally for one calling service.
    #[must_use]
    pub fn calls(&self, service: Option<&str>) -> Value {
        branch(self.payload.get_opt("calls"), &[service])
    }

    /// Transactions, optionally of one kind (`commit`, `rollback`, `complete`).
    #[must_use]
    pub fn transactions(&self, kind: Option<&str>) -> Value {
        branch(self.payload.get_opt("transactions"), &[kind])
    }

    /// Errors, optionally for one address.
    #[must_use]
    pub fn errors(&self, address: Option<&str>) -> Value {
        branch(self.payload.get_opt("errors"), &[address])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katana_payload::{Entity, ErrorPayload, PathSpec};
    use rstest::{fixture, rstest};

    #[fixture]
    fn transport() -> Transport {
        let origin = vec![json!("users"), json!("1.0"), json!("read")];
        let mut payload = TransportPayload::new("1.0.0", "req-1", origin, None, None);
        payload
            .set("meta/properties/!tenant", "acme")
            .expect("set property");
        payload
            .set(PathSpec::with_delimiter("data|gw:80|!users|1.0|!read", '|'), json!([{"id": 1}]))
            .expect("set data");
        Transport::new(payload)
    }

    #[rstest]
    fn meta_accessors_read_the_request(transport: Transport) {
        assert_eq!(transport.request_id(), "req-1");
        assert!(!transport.request_timestamp().is_empty());
        assert_eq!(transport.origin_service(), vec![json!("users"), json!("1.0"), json!("read")]);
        assert_eq!(transport.property("tenant", ""), "acme");
        assert_eq!(transport.property("locale", "en"), "en");
        assert_eq!(transport.properties().len(), 1);
    }

    #[rstest]
    fn data_walks_keys_until_the_first_gap(transport: Transport) {
        assert_eq!(
            transport.data(Some("gw:80"), Some("users"), Some("1.0")),
            json!({"read": [{"id": 1}]})
        );
        assert_eq!(
            transport.data(Some("gw:80"), None, Some("ignored")),
            json!({"users": {"1.0": {"read": [{"id": 1}]}}})
        );
        assert_eq!(transport.data(Some("elsewhere"), None, None), json!({}));
    }

    #[rstest]
    fn absent_regions_read_as_empty(transport: Transport) {
        assert_eq!(transport.relations(None), json!({}));
        assert_eq!(transport.links(Some("gw:80")), json!({}));
        assert_eq!(transport.calls(None), json!({}));
        assert_eq!(transport.transactions(Some("commit")), json!({}));
        assert!(!transport.has_download());
        assert!(transport.download().expect("no download").is_none());
    }

    #[test]
    fn errors_accumulate_in_push_order() {
        let mut payload = TransportPayload::from_payload(Payload::new());
        for message in ["first", "second"] {
            payload
                .push("errors/svc/1.0", ErrorPayload::with_message(message).into_payload().into_value())
                .expect("push error");
        }
        let transport = Transport::new(payload);
        let errors = transport.errors(Some("svc"));
        let pushed = errors.get("1.0").and_then(Value::as_array).expect("error list");
        let expected: Vec<Value> = ["first", "second"]
            .into_iter()
            .map(|message| ErrorPayload::with_message(message).into_payload().into_value())
            .collect();
        assert_eq!(pushed, &expected);
    }
}
