//! Path-addressable payloads and the wire protocol of the Katana platform.
//!
//! A [`Payload`] is a nested mapping addressed through delimited paths such
//! as `command/arguments/x`. Every path segment may be stored under a short
//! alias (`command` travels as `c`) to keep messages compact; lookups accept
//! either form. Segments prefixed with `!` are never aliased.
//!
//! On top of the container the crate provides:
//!
//! - [`ShortLivedPayload`], a payload that refuses access after a time to live;
//! - [`pack`] and [`unpack`], the msgpack codec used on the wire;
//! - typed envelopes for the payloads exchanged with the platform in
//!   [`protocol`];
//! - [`File`] and [`Param`], the descriptors actions receive and send.

mod codec;
mod error;
pub mod file;
mod mappings;
pub mod param;
pub mod path;
mod payload;
pub mod protocol;
mod short_lived;

/// The mapping type that backs every payload.
pub type Map = serde_json::Map<String, serde_json::Value>;

pub use codec::{pack, unpack};
pub use error::{CodecError, PayloadError};
pub use file::{File, FileError};
pub use mappings::{FIELD_MAPPINGS, FieldMappings, Mappings};
pub use param::{Param, ParamError, ParamType};
pub use path::{DEFAULT_DELIMITER, NOMAP_PREFIX, PathSpec, nomap};
pub use payload::Payload;
pub use protocol::{
    CommandPayload, CommandResultPayload, Entity, ErrorPayload, MetaPayload, RequestParts,
    RequestPayload, ResponsePayload, ServiceCallPayload, TransportPayload,
};
pub use serde_json::Value;
pub use short_lived::{DEFAULT_TTL, ShortLivedPayload};
