//! Reply meta flags.

use bytes::Bytes;
use katana_payload::{Payload, PathSpec, TransportPayload, Value, nomap};

use crate::api::PATH_DELIMITER;

/// Flags sent ahead of a reply payload.
///
/// Each flag travels as one byte; a reply without flags carries
/// [`ReplyMeta::EMPTY`] alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyMeta {
    download: bool,
    transactions: bool,
    calls: bool,
    files: bool,
}

impl ReplyMeta {
    /// No special reply characteristics.
    pub const EMPTY: u8 = 0x00;
    /// The reply registers deferred service calls.
    pub const SERVICE_CALL: u8 = 0x01;
    /// Deferred calls carry files.
    pub const FILES: u8 = 0x02;
    /// The reply registers transactions.
    pub const TRANSACTIONS: u8 = 0x03;
    /// The reply carries a download.
    pub const DOWNLOAD: u8 = 0x04;

    /// Flags for a reply that carries none.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            download: false,
            transactions: false,
            calls: false,
            files: false,
        }
    }

    /// Inspects a Transport returned by the component `name` at `version`.
    #[must_use]
    pub fn inspect(transport: &TransportPayload, name: &str, version: &str) -> Self {
        let non_empty = |region: &str| transport.get_map(region).is_some_and(|map| !map.is_empty());
        let calls_path = format!("calls/{}/{version}", nomap(name));
        let calls = transport
            .get_opt(calls_path.as_str())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let address = transport.public_address();
        let files = calls.iter().any(|call| {
            let call = Payload::from_value(call.clone());
            let path = format!(
                "files|{address}|{}|{}|{}",
                nomap(call.get_str("name").unwrap_or_default()),
                call.get_str("version").unwrap_or_default(),
                nomap(call.get_str("action").unwrap_or_default())
            );
            transport.path_exists(PathSpec::with_delimiter(&path, PATH_DELIMITER))
        });
        Self {
            download: non_empty("body"),
            transactions: non_empty("transactions"),
            calls: !calls.is_empty(),
            files,
        }
    }

    /// Reports whether no flag is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.download || self.transactions || self.calls || self.files)
    }

    /// The meta frame: each set flag in a fixed order.
    #[must_use]
    pub fn to_frame(&self) -> Bytes {
        if self.is_empty() {
            return Bytes::from_static(&[Self::EMPTY]);
        }
        let flags = [
            (self.download, Self::DOWNLOAD),
            (self.transactions, Self::TRANSACTIONS),
            (self.calls, Self::SERVICE_CALL),
            (self.files, Self::FILES),
        ];
        flags
            .into_iter()
            .filter_map(|(set, flag)| set.then_some(flag))
            .collect::<Vec<u8>>()
            .into()
    }
}
