// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The onion message envelope carried inside custom messages.

use bitcoin::secp256k1::PublicKey;

use crate::util::ser::{Readable, Writeable, Writer};
use crate::wire::DecodeError;

use std::io::{self, Read};

/// An onion message envelope: the blinding point for the receiving hop and
/// the opaque sphinx packet it should process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionMessage {
	/// The blinding point the receiving node uses to decrypt the routing data
	/// intended for it.
	pub blinding_point: PublicKey,
	/// The serialized sphinx packet to process.
	pub onion_blob: Vec<u8>,
}

impl OnionMessage {
	/// Creates a new onion message envelope.
	pub fn new(blinding_point: PublicKey, onion_blob: Vec<u8>) -> Self {
		OnionMessage { blinding_point, onion_blob }
	}
}

impl Writeable for OnionMessage {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		encode_tlv_stream!(w, {
			(2, self.blinding_point, required),
			(4, self.onion_blob, vec_type),
		});
		Ok(())
	}
}

impl Readable for OnionMessage {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut blinding_point: Option<PublicKey> = None;
		let mut onion_blob: Option<Vec<u8>> = None;
		decode_tlv_stream!(r, {
			(2, blinding_point, option),
			(4, onion_blob, vec_type),
		});

		let blinding_point = blinding_point.ok_or(DecodeError::InvalidValue)?;
		let onion_blob = onion_blob.ok_or(DecodeError::InvalidValue)?;
		Ok(OnionMessage { blinding_point, onion_blob })
	}
}

#[cfg(test)]
mod tests {
	use super::OnionMessage;
	use crate::util::ser::{Readable, Writeable};
	use crate::util::test_utils::pubkey;
	use crate::wire::DecodeError;

	#[test]
	fn envelope_encoding_round_trips() {
		let msg = OnionMessage::new(pubkey(42), vec![1, 2, 3]);
		let encoded = msg.encode();
		let decoded = OnionMessage::read(&mut &encoded[..]).unwrap();
		assert_eq!(msg, decoded);
	}

	#[test]
	fn envelope_encoding_matches_expected_bytes() {
		let blinding_point = pubkey(42);
		let msg = OnionMessage::new(blinding_point, vec![1, 2, 3]);

		let mut expected = Vec::new();
		expected.extend_from_slice(&hex::decode("0221").unwrap());
		expected.extend_from_slice(&blinding_point.serialize());
		expected.extend_from_slice(&hex::decode("0403010203").unwrap());
		assert_eq!(msg.encode(), expected);
	}

	#[test]
	fn envelope_rejects_missing_records() {
		// A lone onion blob record with no blinding point.
		let encoded = hex::decode("0403010203").unwrap();
		assert_eq!(OnionMessage::read(&mut &encoded[..]), Err(DecodeError::InvalidValue));
	}

	#[test]
	fn envelope_rejects_truncated_streams() {
		let msg = OnionMessage::new(pubkey(42), vec![1, 2, 3]);
		let encoded = msg.encode();
		assert_eq!(
			OnionMessage::read(&mut &encoded[..encoded.len() - 1]),
			Err(DecodeError::ShortRead),
		);
	}
}
