// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Reply paths: blinded routes included in outgoing onion messages so that
//! the recipient can respond without learning the sender's identity.

use bitcoin::secp256k1::PublicKey;

use crate::util::ser::{Readable, Writeable, Writer};
use crate::wire::DecodeError;

use std::io::{self, Read};

/// One hop in a reply path. These hops cannot be identified by outside
/// observers and thus can be used to hide the identity of the recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedHop {
	/// The blinded node id of this hop in a blinded route.
	pub blinded_node_id: PublicKey,
	/// The encrypted payload intended for this hop in a blinded route.
	pub encrypted_data: Vec<u8>,
}

impl_writeable!(BlindedHop, {
	blinded_node_id,
	encrypted_data
});

/// A blinded route attached to an outgoing message so the recipient may send
/// a response without knowing the sender's identity.
///
/// To send to a reply path, the sender finds a route to the unblinded
/// [`first_node_id`], which can unblind its hop's [`encrypted_data`] to find
/// out the onion message's next hop and forward it along.
///
/// [`first_node_id`]: ReplyPath::first_node_id
/// [`encrypted_data`]: BlindedHop::encrypted_data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyPath {
	/// The unblinded introduction node of the route.
	pub first_node_id: PublicKey,
	/// Used by the introduction node to decrypt its hop's encrypted data and
	/// forward the onion message.
	pub blinding_point: PublicKey,
	/// The hops composing the route, introduction node included. Never empty.
	pub hops: Vec<BlindedHop>,
}

impl Writeable for ReplyPath {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.first_node_id.write(w)?;
		self.blinding_point.write(w)?;
		(self.hops.len() as u8).write(w)?;
		for hop in &self.hops {
			hop.write(w)?;
		}
		Ok(())
	}
}

impl Readable for ReplyPath {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let first_node_id = Readable::read(r)?;
		let blinding_point = Readable::read(r)?;
		let num_hops: u8 = Readable::read(r)?;
		if num_hops == 0 { return Err(DecodeError::InvalidValue) }
		let mut hops: Vec<BlindedHop> = Vec::with_capacity(num_hops.into());
		for _ in 0..num_hops {
			hops.push(Readable::read(r)?);
		}
		Ok(ReplyPath {
			first_node_id,
			blinding_point,
			hops,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::{BlindedHop, ReplyPath};
	use crate::util::ser::{Readable, Writeable};
	use crate::util::test_utils::pubkey;
	use crate::wire::DecodeError;

	#[test]
	fn reply_path_encoding_round_trips() {
		let path = ReplyPath {
			first_node_id: pubkey(1),
			blinding_point: pubkey(2),
			hops: vec![
				BlindedHop { blinded_node_id: pubkey(3), encrypted_data: vec![1, 2, 3] },
				BlindedHop { blinded_node_id: pubkey(4), encrypted_data: vec![] },
			],
		};

		let encoded = path.encode();
		assert_eq!(ReplyPath::read(&mut &encoded[..]).unwrap(), path);
	}

	#[test]
	fn reply_path_rejects_zero_hops() {
		let mut encoded = Vec::new();
		encoded.extend_from_slice(&pubkey(1).serialize());
		encoded.extend_from_slice(&pubkey(2).serialize());
		encoded.push(0);
		assert_eq!(ReplyPath::read(&mut &encoded[..]), Err(DecodeError::InvalidValue));
	}

	#[test]
	fn reply_path_rejects_missing_hops() {
		let path = ReplyPath {
			first_node_id: pubkey(1),
			blinding_point: pubkey(2),
			hops: vec![
				BlindedHop { blinded_node_id: pubkey(3), encrypted_data: vec![1, 2, 3] },
			],
		};

		let mut encoded = path.encode();
		// Claim a second hop which is not present.
		let len = encoded.len();
		encoded[66] = 2;
		assert_eq!(ReplyPath::read(&mut &encoded[..len]), Err(DecodeError::ShortRead));
	}
}
