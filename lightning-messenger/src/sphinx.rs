// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! An abstract interface over a sphinx mix-net implementation.
//!
//! The messenger orchestrates route blinding, onion construction, and onion
//! processing but never derives the packet cryptography itself: all of it is
//! consumed through the [`OnionRouter`] trait, implemented by the host over
//! its sphinx library and node ECDH key.

use bitcoin::secp256k1::PublicKey;

use std::error::Error;
use std::fmt;

/// The most hops a sphinx packet can wrap. Paths fed to
/// [`OnionRouter::create_onion`] are fixed-width at this size.
pub const MAX_HOPS: usize = 27;

/// A hop of a cleartext path handed to [`OnionRouter::blind_path`] for
/// blinding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedPathHop {
	/// The cleartext public key of the hop's node.
	pub node_pub: PublicKey,
	/// The routing payload to encrypt to the hop. The final hop of a path
	/// has no payload.
	pub payload: Option<Vec<u8>>,
}

/// A route produced by [`OnionRouter::blind_path`]: the original path with
/// per-hop blinded ids and encrypted routing payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlindedPath {
	/// The cleartext id of the first node in the route. Senders address the
	/// introduction node by its real identity because they use it as a
	/// network peer.
	pub introduction_point: PublicKey,
	/// The ephemeral point the introduction node needs to start unblinding
	/// the route.
	pub blinding_point: PublicKey,
	/// The blinded per-hop ids, one per path hop, introduction node included.
	pub blinded_hops: Vec<PublicKey>,
	/// The encrypted routing payload for each hop, index-aligned with
	/// [`blinded_hops`].
	///
	/// [`blinded_hops`]: BlindedPath::blinded_hops
	pub encrypted_data: Vec<Vec<u8>>,
}

/// One hop of the fixed-width path consumed by [`OnionRouter::create_onion`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OnionHop {
	/// The key the onion layer is encrypted to.
	pub node_pub: PublicKey,
	/// The hop's TLV payload.
	pub payload: Vec<u8>,
}

/// The fixed-width hop list a sphinx packet is built from. At most
/// [`MAX_HOPS`] hops may be occupied; unoccupied entries stay empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentPath {
	hops: [Option<OnionHop>; MAX_HOPS],
}

impl PaymentPath {
	/// Creates an empty path.
	pub fn new() -> Self {
		Self { hops: std::array::from_fn(|_| None) }
	}

	/// Builds a path from the given hops, which must number at most
	/// [`MAX_HOPS`].
	pub fn try_from_hops(hops: Vec<OnionHop>) -> Result<Self, SphinxError> {
		if hops.len() > MAX_HOPS {
			return Err(SphinxError::new(format!(
				"path of {} hops exceeds maximum of {}", hops.len(), MAX_HOPS,
			)));
		}
		let mut path = Self::new();
		for (i, hop) in hops.into_iter().enumerate() {
			path.hops[i] = Some(hop);
		}
		Ok(path)
	}

	/// The number of occupied hops in the path.
	pub fn len(&self) -> usize {
		self.hops.iter().take_while(|hop| hop.is_some()).count()
	}

	/// Whether the path has no occupied hops.
	pub fn is_empty(&self) -> bool {
		self.hops[0].is_none()
	}

	/// Iterates the occupied hops of the path in order.
	pub fn hops(&self) -> impl Iterator<Item = &OnionHop> {
		self.hops.iter().map_while(|hop| hop.as_ref())
	}
}

impl Default for PaymentPath {
	fn default() -> Self {
		Self::new()
	}
}

/// The routing decision a processed onion layer yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PacketAction {
	/// This node is the terminal hop of the message.
	ExitNode,
	/// More hops remain and the packet should be forwarded.
	MoreHops,
	/// Processing completed but the packet cannot be acted on.
	Failure,
}

/// The result of processing one layer of an onion with
/// [`OnionRouter::process_onion`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessedPacket {
	/// What to do with the packet.
	pub action: PacketAction,
	/// The TLV payload addressed to this hop.
	pub payload: Vec<u8>,
	/// When [`action`] indicates more hops, the serialized packet for the
	/// next hop.
	///
	/// [`action`]: ProcessedPacket::action
	pub next_packet: Option<Vec<u8>>,
}

/// Error type for [`OnionRouter`] operations.
#[derive(Debug)]
pub struct SphinxError {
	error: Box<dyn Error + Send + Sync>,
}

impl SphinxError {
	/// Creates a new error originated from the given error.
	pub fn new<E>(error: E) -> Self
	where E: Into<Box<dyn Error + Send + Sync>> {
		Self { error: error.into() }
	}

	/// Converts the error into the underlying error.
	pub fn into_inner(self) -> Box<dyn Error + Send + Sync> {
		self.error
	}
}

impl fmt::Display for SphinxError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "sphinx error: {}", self.error)
	}
}

impl Error for SphinxError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(self.error.as_ref())
	}
}

/// Abstract type for the sphinx operations the messenger consumes. All of
/// the mix-net math lives behind this trait, including generation of the
/// session and ephemeral keys it requires.
pub trait OnionRouter: Send + Sync {
	/// Blinds a path of hops, deriving blinded ids and encrypting each hop's
	/// routing payload.
	fn blind_path(&self, hops: &[BlindedPathHop]) -> Result<BlindedPath, SphinxError>;

	/// Wraps the path into a serialized onion packet, one encrypted layer
	/// per hop.
	fn create_onion(&self, path: &PaymentPath) -> Result<Vec<u8>, SphinxError>;

	/// Processes one layer of an onion packet with our node's ECDH key and
	/// the blinding point the envelope carried. Returns the blinding point
	/// for the next hop along with the processing result.
	fn process_onion(&self, onion_blob: &[u8], blinding_point: &PublicKey)
		-> Result<(PublicKey, ProcessedPacket), SphinxError>;

	/// Decrypts the routing blob encrypted to our node under the given
	/// blinding point.
	fn decrypt_data_blob(&self, blinding_point: &PublicKey, encrypted_data: &[u8])
		-> Result<Vec<u8>, SphinxError>;

	/// Derives a shared secret between our node key and the remote point.
	/// This is the raw primitive the blob decryption and onion processing
	/// above are built on; hosts implement it over their node's keychain.
	fn ecdh(&self, remote_point: &PublicKey) -> Result<[u8; 32], SphinxError>;
}
