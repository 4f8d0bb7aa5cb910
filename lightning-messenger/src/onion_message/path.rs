// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Assembly of the hop lists an onion message is built from: cleartext paths
//! prepared for blinding, and blinded routes converted to the fixed-width
//! form the sphinx layer consumes.

use bitcoin::secp256k1::PublicKey;

use crate::onion_message::messenger::MessengerError;
use crate::sphinx::{BlindedPath, BlindedPathHop, OnionHop, PaymentPath, SphinxError};
use crate::util::ser::Writeable;
use crate::wire::{BlindedRouteData, FinalHopPayload, OnionMessagePayload, ReplyPath};

use std::error::Error;

/// Encodes the TLV stream of routing data for one hop of a route that is
/// about to be blinded. Injected so tests can substitute a failing encoder.
pub(super) trait EncodeBlindedData {
	fn encode_blinded_data(&self, next_node_id: &PublicKey)
		-> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;
}

/// The production encoder: each hop's routing data is the next node's
/// cleartext id.
pub(super) struct BlindedDataEncoder;

impl EncodeBlindedData for BlindedDataEncoder {
	fn encode_blinded_data(&self, next_node_id: &PublicKey)
		-> Result<Vec<u8>, Box<dyn Error + Send + Sync>>
	{
		Ok(BlindedRouteData::new(*next_node_id).encode())
	}
}

/// Takes a set of public keys and creates the set of hops to blind into a
/// route. The first node in the path is the introduction node N(0), and all
/// nodes after it are denoted N(1), N(2), etc.
///
/// Given a path N(0), N(1), ..., N(k), the hops to blind will have the
/// following entries:
///   [0] node_pub: N(0), payload: TLV( next_node_id: N(1) )
///   [1] node_pub: N(1), payload: TLV( next_node_id: N(2) )
///   ...
///   [k] node_pub: N(k)
///
/// We need each hop to have the next node's id in its payload so that it can
/// unblind the route.
pub(super) fn blinded_path_hops<E: EncodeBlindedData>(
	path: &[PublicKey], encode_payload: &E,
) -> Result<Vec<BlindedPathHop>, MessengerError> {
	debug_assert!(!path.is_empty());
	if path.is_empty() {
		return Err(MessengerError::NoPath);
	}

	let mut hops_to_blind = Vec::with_capacity(path.len());

	// Our first hop is the introduction node.
	hops_to_blind.push(BlindedPathHop { node_pub: path[0], payload: None });

	// Run through the remaining path, adding each node's cleartext id to the
	// previous hop's payload.
	for (i, node_pub) in path.iter().enumerate().skip(1) {
		let payload = encode_payload.encode_blinded_data(node_pub)
			.map_err(|e| MessengerError::HopEncoding(i, e))?;
		hops_to_blind[i - 1].payload = Some(payload);

		hops_to_blind.push(BlindedPathHop { node_pub: *node_pub, payload: None });
	}

	Ok(hops_to_blind)
}

/// Converts the blinded route provided to a sphinx path that can be wrapped
/// up in an onion, attaching the caller's reply path and final hop payloads
/// to the last hop.
///
/// We fill our first hop in with the introduction point for the route,
/// specifically not its blinded id: the sender uses the introduction node as
/// a network peer, so it must be addressed by its real identity. All
/// remaining hops are addressed by their blinded ids, which are the only
/// identities we know them by.
pub(super) fn blinded_to_sphinx(
	route: &BlindedPath, reply_path: Option<&ReplyPath>, final_hop_payloads: &[FinalHopPayload],
) -> Result<PaymentPath, MessengerError> {
	if route.encrypted_data.is_empty() || route.encrypted_data.len() != route.blinded_hops.len() {
		return Err(MessengerError::Sphinx(SphinxError::new(
			"blinded route hop and data counts do not match",
		)));
	}

	let last_hop = route.encrypted_data.len() - 1;
	let mut hops = Vec::with_capacity(route.encrypted_data.len());
	for (i, encrypted_data) in route.encrypted_data.iter().enumerate() {
		// Each hop's sphinx payload is an onion message payload wrapping its
		// encrypted routing blob. The final hop additionally carries the
		// payloads the sender addressed to the recipient.
		let payload = OnionMessagePayload {
			reply_path: if i == last_hop { reply_path.cloned() } else { None },
			encrypted_data: Some(encrypted_data.clone()),
			final_hop_payloads: if i == last_hop {
				final_hop_payloads.to_vec()
			} else {
				Vec::new()
			},
		};

		let node_pub = if i == 0 { route.introduction_point } else { route.blinded_hops[i] };
		hops.push(OnionHop { node_pub, payload: payload.encode() });
	}

	PaymentPath::try_from_hops(hops).map_err(MessengerError::Sphinx)
}

/// Adapts a reply path to the blinded route it already is, so that sends to
/// a blinded destination go through the same sphinx conversion as routes we
/// blind ourselves.
pub(super) fn reply_path_to_route(reply_path: &ReplyPath) -> BlindedPath {
	BlindedPath {
		introduction_point: reply_path.first_node_id,
		blinding_point: reply_path.blinding_point,
		blinded_hops: reply_path.hops.iter().map(|hop| hop.blinded_node_id).collect(),
		encrypted_data: reply_path.hops.iter().map(|hop| hop.encrypted_data.clone()).collect(),
	}
}
