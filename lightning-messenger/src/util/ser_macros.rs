// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Some macros that implement [`Readable`]/[`Writeable`] traits for lightning
//! TLV streams.
//!
//! [`Readable`]: crate::util::ser::Readable
//! [`Writeable`]: crate::util::ser::Writeable

macro_rules! encode_tlv {
	($stream: expr, $type: expr, $field: expr, required) => { {
		use $crate::util::ser::Writeable;
		$crate::util::ser::BigSize($type).write($stream)?;
		let mut len_calc = $crate::util::ser::LengthCalculatingWriter(0);
		$field.write(&mut len_calc)?;
		$crate::util::ser::BigSize(len_calc.0 as u64).write($stream)?;
		$field.write($stream)?;
	} };
	($stream: expr, $type: expr, $field: expr, vec_type) => {
		encode_tlv!($stream, $type, $crate::util::ser::VecWriteWrapper(&$field), required);
	};
	($stream: expr, $type: expr, $field: expr, option) => {
		if let Some(ref field) = $field {
			encode_tlv!($stream, $type, field, required);
		}
	};
}

macro_rules! encode_tlv_stream {
	($stream: expr, {$(($type: expr, $field: expr, $fieldty: tt)),* $(,)*}) => { {
		$(
			encode_tlv!($stream, $type, $field, $fieldty);
		)*
	} }
}

macro_rules! decode_tlv {
	($reader: expr, $field: ident, option) => { {
		$field = Some($crate::util::ser::Readable::read(&mut $reader)?);
	} };
	($reader: expr, $field: ident, vec_type) => { {
		let f: $crate::util::ser::VecReadWrapper = $crate::util::ser::Readable::read(&mut $reader)?;
		$field = Some(f.0);
	} };
}

// Fields are decoded into `Option`s and validated by the caller, which lets
// the same stream walk serve both all-optional and required-field messages.
macro_rules! decode_tlv_stream {
	($stream: expr, {$(($type: expr, $field: ident, $fieldty: tt)),* $(,)*}) => { {
		use $crate::wire::DecodeError;
		let mut last_seen_type: Option<u64> = None;
		let mut stream_ref = $stream;
		'tlv_read: loop {
			use $crate::util::ser;

			// First decode the type of this TLV. We track whether any bytes
			// were read to distinguish between a stream that is exhausted at a
			// record boundary (fine) and one truncated mid-record (not fine).
			let typ: ser::BigSize = {
				let mut tracking_reader = ser::ReadTrackingReader::new(&mut stream_ref);
				match <ser::BigSize as ser::Readable>::read(&mut tracking_reader) {
					Err(DecodeError::ShortRead) => {
						if !tracking_reader.have_read {
							break 'tlv_read;
						} else {
							return Err(DecodeError::ShortRead);
						}
					},
					Err(e) => return Err(e),
					Ok(t) => t,
				}
			};

			// Types must be unique and monotonically increasing:
			match last_seen_type {
				Some(t) if typ.0 <= t => {
					return Err(DecodeError::InvalidValue);
				},
				_ => {},
			}
			last_seen_type = Some(typ.0);

			// Finally, read the length and value itself:
			let length: ser::BigSize = ser::Readable::read(&mut stream_ref)?;
			let mut s = ser::FixedLengthReader::new(&mut stream_ref, length.0);
			match typ.0 {
				$($type => {
					decode_tlv!(s, $field, $fieldty);
				},)*
				x if x % 2 == 0 => {
					return Err(DecodeError::UnknownRequiredFeature);
				},
				_ => {},
			}
			s.eat_remaining()?;
		}
	} }
}

macro_rules! impl_writeable {
	($st:ident, {$($field:ident),*}) => {
		impl $crate::util::ser::Writeable for $st {
			fn write<W: $crate::util::ser::Writer>(&self, w: &mut W) -> Result<(), ::std::io::Error> {
				$( self.$field.write(w)?; )*
				Ok(())
			}
		}

		impl $crate::util::ser::Readable for $st {
			fn read<R: ::std::io::Read>(r: &mut R) -> Result<Self, $crate::wire::DecodeError> {
				Ok(Self {
					$($field: $crate::util::ser::Readable::read(r)?),*
				})
			}
		}
	}
}
