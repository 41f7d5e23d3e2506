/*!
# Mafli: Bit Writer.

DEFLATE packs bits LSB-first within each byte, except that Huffman code
values are written MSB-first. This module owns those rules so nothing else
has to think about them.
*/

/// # Bit Writer.
///
/// A plain `Vec`-backed writer. The `bp` member tracks how many bits of the
/// final byte are in use; zero means the stream is byte-aligned.
pub(crate) struct BitWriter {
	out: Vec<u8>,
	bp: u8,
}

impl BitWriter {
	/// # New.
	pub(crate) const fn new() -> Self {
		Self { out: Vec::new(), bp: 0 }
	}

	/// # Consume, Returning the Bytes.
	///
	/// Any partial trailing byte is implicitly zero-padded, which is exactly
	/// what a DEFLATE stream wants after its final block.
	pub(crate) fn finish(self) -> Vec<u8> { self.out }

	/// # Total Bits Written.
	pub(crate) fn len_bits(&self) -> usize {
		if self.bp == 0 { self.out.len() * 8 }
		else { (self.out.len() - 1) * 8 + usize::from(self.bp) }
	}

	/// # Add One Bit.
	pub(crate) fn add_bit(&mut self, bit: u8) {
		if self.bp == 0 { self.out.push(0); }
		let idx = self.out.len() - 1;
		self.out[idx] |= (bit & 1) << self.bp;
		self.bp = self.bp.wrapping_add(1) & 7;
	}

	/// # Add Multiple Bits (LSB-First).
	pub(crate) fn add_bits(&mut self, symbol: u32, length: u32) {
		for i in 0..length {
			self.add_bit(((symbol >> i) & 1) as u8);
		}
	}

	/// # Add Huffman Code Bits (MSB-First).
	///
	/// Same as `add_bits`, except the code value goes out backwards.
	pub(crate) fn add_huffman_bits(&mut self, symbol: u32, length: u32) {
		for i in (0..length).rev() {
			self.add_bit(((symbol >> i) & 1) as u8);
		}
	}

	/// # Add a Block Header.
	///
	/// One BFINAL bit, then the two BTYPE bits.
	pub(crate) fn add_header(&mut self, last_block: bool, btype: u8) {
		self.add_bit(u8::from(last_block));
		self.add_bit(btype & 1);
		self.add_bit((btype & 2) >> 1);
	}

	/// # Add a Stored (Uncompressed) Block.
	///
	/// Stored blocks max out at `u16::MAX` payload bytes, so long slices are
	/// written as several blocks, each with its own header.
	pub(crate) fn add_stored_block(&mut self, last_block: bool, data: &[u8]) {
		let iter = data.chunks(usize::from(u16::MAX));
		let len = iter.len().saturating_sub(1);
		for (i, chunk) in iter.enumerate() {
			self.add_header(last_block && i == len, 0);

			// Ignore bits of input up to the next byte boundary.
			self.bp = 0;

			let blocksize = chunk.len() as u16;
			self.out.extend_from_slice(&blocksize.to_le_bytes());
			self.out.extend_from_slice(&(! blocksize).to_le_bytes());
			self.out.extend_from_slice(chunk);
		}

		// A stored "block" for no data still needs a frame.
		if data.is_empty() {
			self.add_header(last_block, 0);
			self.bp = 0;
			self.out.extend_from_slice(&[0, 0, 0xFF, 0xFF]);
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_bit_order() {
		// 0b101 written LSB-first lands as 1, 0, 1 in ascending bit
		// positions of the first byte.
		let mut w = BitWriter::new();
		w.add_bits(0b101, 3);
		assert_eq!(w.len_bits(), 3);
		assert_eq!(w.finish(), vec![0b0000_0101]);

		// The same value as a Huffman code is mirrored.
		let mut w = BitWriter::new();
		w.add_huffman_bits(0b100, 3);
		assert_eq!(w.finish(), vec![0b0000_0001]);
	}

	#[test]
	fn t_stored() {
		let mut w = BitWriter::new();
		w.add_stored_block(true, &[1, 2, 3]);
		let out = w.finish();

		// Header byte: BFINAL=1, BTYPE=00, then alignment padding.
		assert_eq!(out[0], 0b0000_0001);
		// LEN / NLEN.
		assert_eq!(&out[1..5], &[3, 0, 0xFC, 0xFF]);
		// Payload.
		assert_eq!(&out[5..], &[1, 2, 3]);
	}

	#[test]
	fn t_stored_roundtrip() {
		let data: Vec<u8> = (0_u32..100_000).map(|i| (i % 251) as u8).collect();
		let mut w = BitWriter::new();
		w.add_stored_block(true, &data);
		let back = miniz_oxide::inflate::decompress_to_vec(&w.finish())
			.expect("inflate failed");
		assert_eq!(back, data);
	}
}
