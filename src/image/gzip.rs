/*!
# Merma: Gzip.

RFC 1952 plumbing: pull the deflate payload out of an existing member
(verifying its CRC and size trailer), squeeze it through the encoder, and
wrap it back up with a minimal header. Fresh compression of arbitrary files
uses the same wrapper.
*/

use crate::{
	EncodingError,
	Settings,
};



/// # Header Flag: FHCRC.
const FHCRC: u8 = 0b0000_0010;

/// # Header Flag: FEXTRA.
const FEXTRA: u8 = 0b0000_0100;

/// # Header Flag: FNAME.
const FNAME: u8 = 0b0000_1000;

/// # Header Flag: FCOMMENT.
const FCOMMENT: u8 = 0b0001_0000;



/// # Recompress an Existing Gzip Member.
///
/// Returns a fresh, minimal-header rendition; the caller keeps whichever of
/// old/new is smaller.
pub(crate) fn recompress(raw: &[u8], settings: Settings) -> Result<Vec<u8>, EncodingError> {
	let data = decompress(raw)?;
	Ok(compress(&data, settings))
}

/// # Decompress a Gzip Member.
///
/// The trailer's CRC-32 and modulo-2³² size are both verified; mismatches
/// mean the stream can't be trusted and the file is left alone.
pub(crate) fn decompress(raw: &[u8]) -> Result<Vec<u8>, EncodingError> {
	if raw.len() < 18 || raw[0] != 0x1F || raw[1] != 0x8B || raw[2] != 8 {
		return Err(EncodingError::Format);
	}
	let flags = raw[3];

	// Walk the optional header fields.
	let mut pos = 10;
	if flags & FEXTRA != 0 {
		if pos + 2 > raw.len() { return Err(EncodingError::Format); }
		let xlen = usize::from(u16::from_le_bytes([raw[pos], raw[pos + 1]]));
		pos += 2 + xlen;
	}
	if flags & FNAME != 0 {
		pos += raw.get(pos..)
			.and_then(|r| r.iter().position(|&b| b == 0))
			.ok_or(EncodingError::Format)? + 1;
	}
	if flags & FCOMMENT != 0 {
		pos += raw.get(pos..)
			.and_then(|r| r.iter().position(|&b| b == 0))
			.ok_or(EncodingError::Format)? + 1;
	}
	if flags & FHCRC != 0 { pos += 2; }

	if pos + 8 > raw.len() { return Err(EncodingError::Format); }
	let payload = &raw[pos..raw.len() - 8];
	let trailer = &raw[raw.len() - 8..];

	let data = miniz_oxide::inflate::decompress_to_vec(payload)
		.map_err(|_| EncodingError::Decode)?;

	// CRC-32, then ISIZE.
	let want_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
	let want_len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
	if crc32fast::hash(&data) != want_crc || data.len() as u32 != want_len {
		return Err(EncodingError::Decode);
	}

	Ok(data)
}

/// # Compress Bytes Into a Fresh Gzip Member.
///
/// The header is minimal: no name, no timestamp, maximum-compression XFL,
/// unix OS.
pub(crate) fn compress(data: &[u8], settings: Settings) -> Vec<u8> {
	// The encoder bailing is (supposed to be) impossible, but a boring
	// fallback stream is always expressible.
	let deflated = mafli::deflate(&settings.encoder_options(), true, data)
		.unwrap_or_else(|_| miniz_oxide::deflate::compress_to_vec(data, 9));

	let mut out = Vec::with_capacity(deflated.len() + 18);
	out.extend_from_slice(&[0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 2, 3]);
	out.extend_from_slice(&deflated);
	out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
	out.extend_from_slice(&(data.len() as u32).to_le_bytes());
	out
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_gzip_roundtrip() {
		let data = b"hello hello hello hello hello gzip!".repeat(20);
		let settings = Settings::new();

		let gz = compress(&data, settings);
		assert_eq!(decompress(&gz).unwrap(), data);

		// And the recompression path.
		let gz2 = recompress(&gz, settings).unwrap();
		assert_eq!(decompress(&gz2).unwrap(), data);
	}

	#[test]
	fn t_gzip_flags() {
		// A member with a name field still parses.
		let data = b"payload payload payload".to_vec();
		let settings = Settings::new();
		let plain = compress(&data, settings);

		let mut named = vec![0x1F, 0x8B, 8, FNAME, 0, 0, 0, 0, 2, 3];
		named.extend_from_slice(b"file.txt\0");
		named.extend_from_slice(&plain[10..]);
		assert_eq!(decompress(&named).unwrap(), data);
	}

	#[test]
	fn t_gzip_bad_crc() {
		let data = b"payload payload payload".to_vec();
		let mut gz = compress(&data, Settings::new());
		let at = gz.len() - 6;
		gz[at] ^= 0xFF;
		assert!(decompress(&gz).is_err());
	}
}
