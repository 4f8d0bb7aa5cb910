// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The routing data encrypted into each hop of a blinded route.

use bitcoin::secp256k1::PublicKey;

use crate::util::ser::{Readable, Writeable, Writer};
use crate::wire::DecodeError;

use std::io::{self, Read};

/// The decrypted routing data a hop recovers from its encrypted blob. At
/// every hop but the terminal one it carries the cleartext id of the next
/// node to forward to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlindedRouteData {
	/// The node id of the next hop in the onion message's path. Absent only
	/// at the terminal hop.
	pub next_node_id: Option<PublicKey>,
}

impl BlindedRouteData {
	/// Creates routing data pointing at the provided next hop.
	pub fn new(next_node_id: PublicKey) -> Self {
		BlindedRouteData { next_node_id: Some(next_node_id) }
	}
}

impl Writeable for BlindedRouteData {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		encode_tlv_stream!(w, {
			(4, self.next_node_id, option),
		});
		Ok(())
	}
}

impl Readable for BlindedRouteData {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut next_node_id: Option<PublicKey> = None;
		decode_tlv_stream!(r, {
			(4, next_node_id, option),
		});
		Ok(BlindedRouteData { next_node_id })
	}
}

#[cfg(test)]
mod tests {
	use super::BlindedRouteData;
	use crate::util::ser::{Readable, Writeable};
	use crate::util::test_utils::pubkey;

	#[test]
	fn route_data_encoding_round_trips() {
		let data = BlindedRouteData::new(pubkey(7));
		let encoded = data.encode();
		assert_eq!(BlindedRouteData::read(&mut &encoded[..]).unwrap(), data);
	}

	#[test]
	fn terminal_route_data_is_empty() {
		let data = BlindedRouteData { next_node_id: None };
		let encoded = data.encode();
		assert!(encoded.is_empty());
		assert_eq!(BlindedRouteData::read(&mut &encoded[..]).unwrap(), data);
	}

	#[test]
	fn route_data_encoding_matches_expected_bytes() {
		let next_node_id = pubkey(7);
		let data = BlindedRouteData::new(next_node_id);

		let mut expected = hex::decode("0421").unwrap();
		expected.extend_from_slice(&next_node_id.serialize());
		assert_eq!(data.encode(), expected);
	}
}
