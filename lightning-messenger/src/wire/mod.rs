// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire encoding for onion messages and the TLV payloads nested inside them.
//!
//! Encoding is canonical throughout: TLV records are strictly ascending by
//! type with no duplicates, unknown even types are rejected, and unknown odd
//! types are skipped.

use std::fmt;
use std::io;

mod blinded_data;
mod onion_message;
mod payload;
mod reply_path;

pub use self::blinded_data::BlindedRouteData;
pub use self::onion_message::OnionMessage;
pub use self::payload::{
	validate_final_payload, FinalHopPayload, NotFinalPayload, OnionMessagePayload,
	FINAL_HOP_PAYLOAD_START,
};
pub use self::reply_path::{BlindedHop, ReplyPath};

/// The custom message type used to exchange onion messages over a node's
/// custom-message transport.
pub const ONION_MESSAGES_TYPE: u16 = 513;

/// An error in decoding a message or struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
	/// Unknown even TLV types are explicitly disallowed
	UnknownRequiredFeature,
	/// Failed to decode a value which was sane on its face, e.g. an
	/// out-of-curve point or an out-of-order TLV stream
	InvalidValue,
	/// The buffer to be read was too short
	ShortRead,
	/// A length descriptor in the packet didn't describe the later data
	/// correctly.
	BadLengthDescriptor,
	/// Error from [`std::io`].
	Io(io::ErrorKind),
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			DecodeError::UnknownRequiredFeature => f.write_str("Unknown required feature preventing decode"),
			DecodeError::InvalidValue => f.write_str("Nonsense bytes didn't map to the type they were interpreted as"),
			DecodeError::ShortRead => f.write_str("Packet extended beyond the provided bytes"),
			DecodeError::BadLengthDescriptor => f.write_str("A length descriptor in the packet didn't describe the later data correctly"),
			DecodeError::Io(ref e) => fmt::Debug::fmt(e, f),
		}
	}
}

impl std::error::Error for DecodeError {}

impl From<io::Error> for DecodeError {
	fn from(e: io::Error) -> Self {
		if e.kind() == io::ErrorKind::UnexpectedEof {
			DecodeError::ShortRead
		} else {
			DecodeError::Io(e.kind())
		}
	}
}
