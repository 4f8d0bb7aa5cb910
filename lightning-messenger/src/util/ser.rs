// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A very simple serialization framework which is used to serialize/deserialize
//! the wire messages the messenger sends and receives.

use bitcoin::secp256k1::PublicKey;

use crate::wire::DecodeError;

use std::cmp;
use std::io::{self, Read, Write};

/// A trait that is similar to [`std::io::Write`] but has one extra function
/// which can be used to size buffers being written into.
///
/// An impl is provided for any type that also impls [`std::io::Write`] which
/// simply ignores size hints.
pub trait Writer {
	/// Writes the given buf out. See std::io::Write::write_all for more
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error>;
	/// Hints that data of the given size is about the be written. This may not
	/// always be called prior to data being written and may be safely ignored.
	fn size_hint(&mut self, size: usize);
}

impl<W: Write> Writer for W {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		<Self as io::Write>::write_all(self, buf)
	}
	#[inline]
	fn size_hint(&mut self, _size: usize) { }
}

pub(crate) struct VecWriter(pub Vec<u8>);
impl Writer for VecWriter {
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0.extend_from_slice(buf);
		Ok(())
	}
	fn size_hint(&mut self, size: usize) {
		self.0.reserve_exact(size);
	}
}

/// Writer that only tracks the amount of data written - useful if you need to
/// calculate the length of some data when serialized but don't yet need the
/// full data.
pub(crate) struct LengthCalculatingWriter(pub usize);
impl Writer for LengthCalculatingWriter {
	#[inline]
	fn write_all(&mut self, buf: &[u8]) -> Result<(), io::Error> {
		self.0 += buf.len();
		Ok(())
	}
	#[inline]
	fn size_hint(&mut self, _size: usize) {}
}

/// Essentially [`std::io::Take`] but a bit simpler and with a method to walk
/// the underlying stream forward to ensure we always consume exactly the
/// fixed length specified.
pub(crate) struct FixedLengthReader<R: Read> {
	read: R,
	bytes_read: u64,
	total_bytes: u64,
}
impl<R: Read> FixedLengthReader<R> {
	pub fn new(read: R, total_bytes: u64) -> Self {
		Self { read, bytes_read: 0, total_bytes }
	}

	#[inline]
	pub fn eat_remaining(&mut self) -> Result<(), DecodeError> {
		io::copy(self, &mut io::sink()).map_err(|_| DecodeError::ShortRead)?;
		if self.bytes_read != self.total_bytes {
			Err(DecodeError::ShortRead)
		} else {
			Ok(())
		}
	}
}
impl<R: Read> Read for FixedLengthReader<R> {
	#[inline]
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		if self.total_bytes == self.bytes_read {
			Ok(0)
		} else {
			let read_len = cmp::min(dest.len() as u64, self.total_bytes - self.bytes_read);
			match self.read.read(&mut dest[0..(read_len as usize)]) {
				Ok(v) => {
					self.bytes_read += v as u64;
					Ok(v)
				},
				Err(e) => Err(e),
			}
		}
	}
}

/// A [`Read`] which tracks whether any bytes have been read at all. This
/// allows us to distinguish between "EOF reached before we started" and "EOF
/// reached mid-read".
pub(crate) struct ReadTrackingReader<R: Read> {
	read: R,
	pub have_read: bool,
}
impl<R: Read> ReadTrackingReader<R> {
	pub fn new(read: R) -> Self {
		Self { read, have_read: false }
	}
}
impl<R: Read> Read for ReadTrackingReader<R> {
	#[inline]
	fn read(&mut self, dest: &mut [u8]) -> Result<usize, io::Error> {
		match self.read.read(dest) {
			Ok(0) => Ok(0),
			Ok(len) => {
				self.have_read = true;
				Ok(len)
			},
			Err(e) => Err(e),
		}
	}
}

/// A trait that various wire types implement allowing them to be written out
/// to a [`Writer`].
pub trait Writeable {
	/// Writes self out to the given [`Writer`]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error>;

	/// Writes self out to a `Vec<u8>`
	fn encode(&self) -> Vec<u8> {
		let mut msg = VecWriter(Vec::new());
		self.write(&mut msg).expect("in-memory writes cannot fail");
		msg.0
	}

	/// Gets the length of this object after it has been serialized. This can
	/// be overridden to optimize cases where we prepend an object with its
	/// length.
	fn serialized_length(&self) -> usize {
		let mut len_calc = LengthCalculatingWriter(0);
		self.write(&mut len_calc).expect("in-memory writes cannot fail");
		len_calc.0
	}
}

impl<'a, T: Writeable> Writeable for &'a T {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> { (*self).write(writer) }
}

/// A trait that various wire types implement allowing them to be read in from
/// a [`Read`].
pub trait Readable
	where Self: Sized
{
	/// Reads a `Self` in from the given [`Read`].
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError>;
}

/// Lightning TLV uses a custom variable-length integer called `BigSize`. It is
/// similar to Bitcoin's variable-length integers except that it is serialized
/// in big-endian instead of little-endian.
///
/// Like Bitcoin's variable-length integer, it exhibits ambiguity in that
/// certain values can be encoded in several different ways, which we must
/// check for at deserialization-time.
pub(crate) struct BigSize(pub u64);
impl Writeable for BigSize {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		match self.0 {
			0..=0xFC => {
				(self.0 as u8).write(writer)
			},
			0xFD..=0xFFFF => {
				0xFDu8.write(writer)?;
				(self.0 as u16).write(writer)
			},
			0x10000..=0xFFFFFFFF => {
				0xFEu8.write(writer)?;
				(self.0 as u32).write(writer)
			},
			_ => {
				0xFFu8.write(writer)?;
				self.0.write(writer)
			},
		}
	}
}
impl Readable for BigSize {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<BigSize, DecodeError> {
		let n: u8 = Readable::read(reader)?;
		match n {
			0xFF => {
				let x: u64 = Readable::read(reader)?;
				if x < 0x100000000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x))
				}
			},
			0xFE => {
				let x: u32 = Readable::read(reader)?;
				if x < 0x10000 {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			0xFD => {
				let x: u16 = Readable::read(reader)?;
				if x < 0xFD {
					Err(DecodeError::InvalidValue)
				} else {
					Ok(BigSize(x as u64))
				}
			},
			n => Ok(BigSize(n as u64))
		}
	}
}

macro_rules! impl_writeable_primitive {
	($val_type:ty, $len: expr) => {
		impl Writeable for $val_type {
			#[inline]
			fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
				writer.write_all(&self.to_be_bytes())
			}
		}
		impl Readable for $val_type {
			#[inline]
			fn read<R: Read>(reader: &mut R) -> Result<$val_type, DecodeError> {
				let mut buf = [0; $len];
				reader.read_exact(&mut buf)?;
				Ok(<$val_type>::from_be_bytes(buf))
			}
		}
	}
}

impl_writeable_primitive!(u64, 8);
impl_writeable_primitive!(u32, 4);
impl_writeable_primitive!(u16, 2);

impl Writeable for u8 {
	#[inline]
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), io::Error> {
		writer.write_all(&[*self])
	}
}
impl Readable for u8 {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<u8, DecodeError> {
		let mut buf = [0; 1];
		reader.read_exact(&mut buf)?;
		Ok(buf[0])
	}
}

// u8 arrays
macro_rules! impl_array {
	( $size:expr ) => (
		impl Writeable for [u8; $size] {
			#[inline]
			fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
				w.write_all(self)
			}
		}

		impl Readable for [u8; $size] {
			#[inline]
			fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
				let mut buf = [0u8; $size];
				r.read_exact(&mut buf)?;
				Ok(buf)
			}
		}
	);
}

impl_array!(33); // for PublicKey

// Vectors are written with a u16 length prefix. TLV record values whose
// length comes from the record itself use the Vec{Write,Read}Wrapper types
// below instead.
impl Writeable for Vec<u8> {
	#[inline]
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		(self.len() as u16).write(w)?;
		w.write_all(self)
	}
}

impl Readable for Vec<u8> {
	#[inline]
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let len: u16 = Readable::read(r)?;
		let mut ret = vec![0; len as usize];
		r.read_exact(&mut ret)?;
		Ok(ret)
	}
}

/// Wrapper to write a slice without its length prefix, for values whose
/// length is provided by an enclosing TLV record.
pub(crate) struct VecWriteWrapper<'a>(pub &'a [u8]);
impl<'a> Writeable for VecWriteWrapper<'a> {
	#[inline]
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		w.write_all(self.0)
	}
}

/// Wrapper to read bytes until the end of the (fixed-length) stream, for
/// values whose length is provided by an enclosing TLV record.
pub(crate) struct VecReadWrapper(pub Vec<u8>);
impl Readable for VecReadWrapper {
	#[inline]
	fn read<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
		let mut values = Vec::new();
		reader.read_to_end(&mut values)?;
		Ok(Self(values))
	}
}

impl Writeable for PublicKey {
	fn write<W: Writer>(&self, w: &mut W) -> Result<(), io::Error> {
		self.serialize().write(w)
	}
	#[inline]
	fn serialized_length(&self) -> usize { 33 }
}

impl Readable for PublicKey {
	fn read<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
		let buf: [u8; 33] = Readable::read(r)?;
		match PublicKey::from_slice(&buf) {
			Ok(key) => Ok(key),
			Err(_) => Err(DecodeError::InvalidValue),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{BigSize, Readable, Writeable};
	use crate::wire::DecodeError;

	fn bigsize_encoding(value: u64) -> Vec<u8> {
		BigSize(value).encode()
	}

	fn bigsize_decoding(bytes: &[u8]) -> Result<u64, DecodeError> {
		let mut reader = std::io::Cursor::new(bytes);
		<BigSize as Readable>::read(&mut reader).map(|b| b.0)
	}

	#[test]
	fn bigsize_round_trips() {
		for value in [0u64, 1, 0xFC, 0xFD, 0xFFFF, 0x10000, 0xFFFFFFFF, 0x100000000, u64::MAX] {
			assert_eq!(bigsize_decoding(&bigsize_encoding(value)).unwrap(), value);
		}
	}

	#[test]
	fn bigsize_encoding_is_minimal() {
		assert_eq!(bigsize_encoding(0xFC), hex::decode("fc").unwrap());
		assert_eq!(bigsize_encoding(0xFD), hex::decode("fd00fd").unwrap());
		assert_eq!(bigsize_encoding(0xFFFF), hex::decode("fdffff").unwrap());
		assert_eq!(bigsize_encoding(0x10000), hex::decode("fe00010000").unwrap());
	}

	#[test]
	fn bigsize_rejects_non_minimal_encodings() {
		// 0xFC must be encoded in a single byte.
		assert_eq!(bigsize_decoding(&hex::decode("fd00fc").unwrap()), Err(DecodeError::InvalidValue));
		assert_eq!(bigsize_decoding(&hex::decode("fe0000ffff").unwrap()), Err(DecodeError::InvalidValue));
		assert_eq!(
			bigsize_decoding(&hex::decode("ff00000000ffffffff").unwrap()),
			Err(DecodeError::InvalidValue),
		);
	}

	#[test]
	fn bigsize_rejects_truncation() {
		assert_eq!(bigsize_decoding(&hex::decode("fd00").unwrap()), Err(DecodeError::ShortRead));
		assert_eq!(bigsize_decoding(&[]), Err(DecodeError::ShortRead));
	}
}
