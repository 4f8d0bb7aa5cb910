// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The cleartext TLV payload found inside each layer of an onion message.

use crate::util::ser::{
	BigSize, FixedLengthReader, ReadTrackingReader, Readable, VecReadWrapper, VecWriteWrapper,
	Writeable, Writer,
};
use crate::wire::{DecodeError, ReplyPath};

use std::fmt;
use std::io::{self, Read};

/// TLV type of the reply path record in an onion message payload.
const REPLY_PATH_TYPE: u64 = 2;

/// TLV type of the encrypted data record in an onion message payload.
const ENCRYPTED_DATA_TYPE: u64 = 4;

/// The start of the TLV range reserved for payloads addressed to the final
/// hop. Types in this range are delivered to the application handler
/// registered for them.
pub const FINAL_HOP_PAYLOAD_START: u64 = 64;

/// Error returned when a TLV type lies below the final hop payload range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotFinalPayload(
	/// The TLV type that failed validation.
	pub u64,
);

impl fmt::Display for NotFinalPayload {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "tlv type {} is not in the final hop payload range (>= {})",
			self.0, FINAL_HOP_PAYLOAD_START)
	}
}

impl std::error::Error for NotFinalPayload {}

/// Checks that a TLV type lies within the range reserved for final hop
/// payloads. Used when handlers are registered and when send requests are
/// validated.
pub fn validate_final_payload(tlv_type: u64) -> Result<(), NotFinalPayload> {
	if tlv_type < FINAL_HOP_PAYLOAD_START {
		return Err(NotFinalPayload(tlv_type));
	}
	Ok(())
}

/// An application payload addressed to the final hop of an onion message.
/// Multiple payloads with distinct TLV types may be attached to a single
/// message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalHopPayload {
	/// The TLV type the payload is delivered under, in the final hop payload
	/// range.
	pub tlv_type: u64,
	/// The opaque payload value, interpreted by the registered handler.
	pub value: Vec<u8>,
}

/// The decrypted TLV stream found at one hop of an onion message.
///
/// Forwarding hops see only [`encrypted_data`]; the final hop may
/// additionally find a reply path and application payloads.
///
/// [`encrypted_data`]: OnionMessagePayload::encrypted_data
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnionMessagePayload {
	/// A blinded route the recipient may use to respond to the sender.
	pub reply_path: Option<ReplyPath>,
	/// The encrypted routing blob for this hop, produced when the route was
	/// blinded.
	pub encrypted_data: Option<Vec<u8>>,
	/// Application payloads for the final hop. Must be empty on payloads
	/// addressed to forwarding hops.
	pub final_hop_payloads: Vec<FinalHopPayload>,
}

fn write_tlv_record<W: Writer, T: Writeable>(w: &mut W, tlv_type: u64, value: &T) -> Result<(), io::Error> {
	BigSize(tlv_type).write(w)?;
	BigSize(value.serialized_length() as u64).write(w)?;
	value.write(w)
}

impl Writeable for OnionMessagePayload {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		if let Some(ref reply_path) = self.reply_path {
			write_tlv_record(w, REPLY_PATH_TYPE, reply_path)?;
		}
		if let Some(ref encrypted_data) = self.encrypted_data {
			write_tlv_record(w, ENCRYPTED_DATA_TYPE, &VecWriteWrapper(encrypted_data))?;
		}

		// Final hop payloads are encoded in ascending type order to keep the
		// stream canonical regardless of the order the caller provided them.
		let mut final_hop_payloads: Vec<&FinalHopPayload> = self.final_hop_payloads.iter().collect();
		final_hop_payloads.sort_by_key(|payload| payload.tlv_type);
		for payload in final_hop_payloads {
			debug_assert!(payload.tlv_type >= FINAL_HOP_PAYLOAD_START);
			write_tlv_record(w, payload.tlv_type, &VecWriteWrapper(&payload.value))?;
		}
		Ok(())
	}
}

// The open-ended final payload range can't be expressed as a fixed TLV field
// set, so the stream is walked by hand here, applying the same rules as
// decode_tlv_stream!: strictly ascending types, no duplicates, unknown even
// types rejected, unknown odd types skipped.
impl Readable for OnionMessagePayload {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let mut reply_path: Option<ReplyPath> = None;
		let mut encrypted_data: Option<Vec<u8>> = None;
		let mut final_hop_payloads = Vec::new();

		let mut last_seen_type: Option<u64> = None;
		loop {
			let typ: BigSize = {
				let mut tracking_reader = ReadTrackingReader::new(&mut *r);
				match <BigSize as Readable>::read(&mut tracking_reader) {
					Err(DecodeError::ShortRead) => {
						if !tracking_reader.have_read {
							break;
						} else {
							return Err(DecodeError::ShortRead);
						}
					},
					Err(e) => return Err(e),
					Ok(t) => t,
				}
			};

			match last_seen_type {
				Some(t) if typ.0 <= t => {
					return Err(DecodeError::InvalidValue);
				},
				_ => {},
			}
			last_seen_type = Some(typ.0);

			let length: BigSize = Readable::read(r)?;
			let mut s = FixedLengthReader::new(&mut *r, length.0);
			match typ.0 {
				REPLY_PATH_TYPE => {
					reply_path = Some(Readable::read(&mut s)?);
				},
				ENCRYPTED_DATA_TYPE => {
					let data: VecReadWrapper = Readable::read(&mut s)?;
					encrypted_data = Some(data.0);
				},
				t if t >= FINAL_HOP_PAYLOAD_START => {
					let value: VecReadWrapper = Readable::read(&mut s)?;
					final_hop_payloads.push(FinalHopPayload { tlv_type: t, value: value.0 });
				},
				t if t % 2 == 0 => {
					return Err(DecodeError::UnknownRequiredFeature);
				},
				_ => {},
			}
			s.eat_remaining()?;
		}

		Ok(OnionMessagePayload { reply_path, encrypted_data, final_hop_payloads })
	}
}

#[cfg(test)]
mod tests {
	use super::{
		validate_final_payload, FinalHopPayload, NotFinalPayload, OnionMessagePayload,
		FINAL_HOP_PAYLOAD_START,
	};
	use crate::util::ser::{Readable, Writeable};
	use crate::util::test_utils::pubkey;
	use crate::wire::{BlindedHop, DecodeError, ReplyPath};

	fn test_reply_path() -> ReplyPath {
		ReplyPath {
			first_node_id: pubkey(1),
			blinding_point: pubkey(2),
			hops: vec![
				BlindedHop { blinded_node_id: pubkey(3), encrypted_data: vec![6, 5, 4] },
			],
		}
	}

	#[test]
	fn payload_encoding_round_trips() {
		let payload = OnionMessagePayload {
			reply_path: Some(test_reply_path()),
			encrypted_data: Some(vec![9, 8, 7]),
			final_hop_payloads: vec![
				FinalHopPayload { tlv_type: 101, value: vec![1, 2, 3] },
				FinalHopPayload { tlv_type: 103, value: vec![] },
			],
		};

		let encoded = payload.encode();
		assert_eq!(OnionMessagePayload::read(&mut &encoded[..]).unwrap(), payload);
	}

	#[test]
	fn empty_payload_round_trips() {
		let payload = OnionMessagePayload::default();
		let encoded = payload.encode();
		assert!(encoded.is_empty());
		assert_eq!(OnionMessagePayload::read(&mut &encoded[..]).unwrap(), payload);
	}

	#[test]
	fn payload_encoding_matches_expected_bytes() {
		let payload = OnionMessagePayload {
			reply_path: None,
			encrypted_data: Some(vec![9, 8, 7]),
			final_hop_payloads: vec![
				FinalHopPayload { tlv_type: 101, value: vec![1, 2, 3] },
			],
		};

		// 04 (type) 03 (length) 090807, then 65 (type 101) 03 (length) 010203.
		assert_eq!(payload.encode(), hex::decode("04030908076503010203").unwrap());
	}

	#[test]
	fn final_hop_payloads_are_encoded_in_ascending_type_order() {
		let payload = OnionMessagePayload {
			reply_path: None,
			encrypted_data: None,
			final_hop_payloads: vec![
				FinalHopPayload { tlv_type: 103, value: vec![7] },
				FinalHopPayload { tlv_type: 101, value: vec![1, 2, 3] },
			],
		};

		let decoded = OnionMessagePayload::read(&mut &payload.encode()[..]).unwrap();
		assert_eq!(decoded.final_hop_payloads[0].tlv_type, 101);
		assert_eq!(decoded.final_hop_payloads[1].tlv_type, 103);
	}

	#[test]
	fn payload_rejects_duplicate_records() {
		// Two encrypted data records.
		let encoded = hex::decode("0403090807040309ffff").unwrap();
		assert_eq!(
			OnionMessagePayload::read(&mut &encoded[..]),
			Err(DecodeError::InvalidValue),
		);
	}

	#[test]
	fn payload_rejects_unknown_even_types() {
		// Type 6 is even, unknown, and below the final payload range.
		let encoded = hex::decode("04030908070600").unwrap();
		assert_eq!(
			OnionMessagePayload::read(&mut &encoded[..]),
			Err(DecodeError::UnknownRequiredFeature),
		);
	}

	#[test]
	fn payload_skips_unknown_odd_types() {
		// Type 7 is odd, unknown, and below the final payload range.
		let encoded = hex::decode("0403090807070239ff").unwrap();
		let decoded = OnionMessagePayload::read(&mut &encoded[..]).unwrap();
		assert_eq!(decoded.encrypted_data, Some(vec![9, 8, 7]));
		assert!(decoded.final_hop_payloads.is_empty());
	}

	#[test]
	fn payload_rejects_truncated_records() {
		// Encrypted data record claims three bytes but carries two.
		let encoded = hex::decode("04030908").unwrap();
		assert_eq!(
			OnionMessagePayload::read(&mut &encoded[..]),
			Err(DecodeError::ShortRead),
		);
	}

	#[test]
	fn final_payload_range_is_validated() {
		assert_eq!(validate_final_payload(FINAL_HOP_PAYLOAD_START), Ok(()));
		assert_eq!(validate_final_payload(100), Ok(()));
		assert_eq!(validate_final_payload(10), Err(NotFinalPayload(10)));
		assert_eq!(
			validate_final_payload(FINAL_HOP_PAYLOAD_START - 1),
			Err(NotFinalPayload(FINAL_HOP_PAYLOAD_START - 1)),
		);
	}
}
