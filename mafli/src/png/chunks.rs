/*!
# Mafli: PNG Chunks.

A minimal chunk reader/writer: enough to pull IHDR/PLTE/tRNS/IDAT apart
(verifying CRCs along the way), carry ancillary chunks through untouched,
and put a rebuilt file back together in legal order.
*/

use crate::error::ContainerError;



/// # PNG Signature.
const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];



#[derive(Debug, Clone, Copy)]
/// # Image Header.
pub(crate) struct Ihdr {
	/// # Width (Pixels).
	pub(crate) width: u32,

	/// # Height (Pixels).
	pub(crate) height: u32,

	/// # Bit Depth.
	pub(crate) bit_depth: u8,

	/// # Color Type.
	pub(crate) color_type: u8,

	/// # Interlace Method.
	pub(crate) interlace: u8,
}

impl Ihdr {
	/// # Parse From Chunk Data.
	fn parse(data: &[u8]) -> Result<Self, ContainerError> {
		if data.len() != 13 { return Err(ContainerError::Malformed); }

		let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
		let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
		let bit_depth = data[8];
		let color_type = data[9];
		let interlace = data[12];

		if width == 0 || height == 0 { return Err(ContainerError::Malformed); }
		if data[10] != 0 || data[11] != 0 || interlace > 1 {
			return Err(ContainerError::Malformed);
		}

		// Legal color/depth combinations only.
		let ok = match color_type {
			0 => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
			3 => matches!(bit_depth, 1 | 2 | 4 | 8),
			2 | 4 | 6 => matches!(bit_depth, 8 | 16),
			_ => false,
		};
		if ! ok { return Err(ContainerError::Malformed); }

		Ok(Self { width, height, bit_depth, color_type, interlace })
	}

	/// # Serialize to Chunk Data.
	pub(crate) fn to_bytes(self) -> [u8; 13] {
		let mut out = [0_u8; 13];
		out[..4].copy_from_slice(&self.width.to_be_bytes());
		out[4..8].copy_from_slice(&self.height.to_be_bytes());
		out[8] = self.bit_depth;
		out[9] = self.color_type;
		out[12] = self.interlace;
		out
	}

	/// # Bits Per Pixel.
	pub(crate) const fn bpp_bits(self) -> u32 {
		let channels: u32 = match self.color_type {
			2 => 3,
			4 => 2,
			6 => 4,
			_ => 1, // Gray and palette.
		};
		channels * self.bit_depth as u32
	}

	/// # Scanline Bytes (Without the Filter Byte).
	pub(crate) const fn row_bytes(self) -> usize {
		((self.width as u64 * self.bpp_bits() as u64).div_ceil(8)) as usize
	}
}



/// # A Parsed PNG.
pub(crate) struct PngFile {
	/// # Header.
	pub(crate) ihdr: Ihdr,

	/// # Palette Entries (Raw RGB Triples).
	pub(crate) plte: Option<Vec<u8>>,

	/// # Transparency Data.
	pub(crate) trns: Option<Vec<u8>>,

	/// # Concatenated (Still-Compressed) IDAT Payload.
	pub(crate) idat: Vec<u8>,

	/// # Ancillary Chunks Seen Before IDAT.
	pub(crate) head_extra: Vec<([u8; 4], Vec<u8>)>,

	/// # Ancillary Chunks Seen After IDAT.
	pub(crate) tail_extra: Vec<([u8; 4], Vec<u8>)>,
}

impl PngFile {
	/// # Parse.
	///
	/// Chunk CRCs are verified; structural surprises (missing IHDR, data
	/// past IEND, bad ordering basics) are malformed.
	pub(crate) fn parse(src: &[u8]) -> Result<Self, ContainerError> {
		if src.len() < 8 + 12 || src[..8] != SIGNATURE {
			return Err(ContainerError::Malformed);
		}

		let mut ihdr: Option<Ihdr> = None;
		let mut plte = None;
		let mut trns = None;
		let mut idat = Vec::new();
		let mut head_extra = Vec::new();
		let mut tail_extra = Vec::new();
		let mut seen_idat = false;
		let mut seen_iend = false;

		let mut pos = 8;
		while pos + 12 <= src.len() {
			let len = u32::from_be_bytes([src[pos], src[pos + 1], src[pos + 2], src[pos + 3]]) as usize;
			if pos + 12 + len > src.len() { return Err(ContainerError::Malformed); }

			let tag: [u8; 4] = [src[pos + 4], src[pos + 5], src[pos + 6], src[pos + 7]];
			let data = &src[pos + 8..pos + 8 + len];
			let crc = u32::from_be_bytes([
				src[pos + 8 + len],
				src[pos + 9 + len],
				src[pos + 10 + len],
				src[pos + 11 + len],
			]);

			// Verify the checksum (over tag + data).
			let mut hasher = crc32fast::Hasher::new();
			hasher.update(&tag);
			hasher.update(data);
			if hasher.finalize() != crc { return Err(ContainerError::Malformed); }

			match &tag {
				b"IHDR" => {
					if ihdr.is_some() { return Err(ContainerError::Malformed); }
					ihdr = Some(Ihdr::parse(data)?);
				},
				b"PLTE" => {
					if len == 0 || len % 3 != 0 || len > 768 || seen_idat {
						return Err(ContainerError::Malformed);
					}
					plte = Some(data.to_vec());
				},
				b"tRNS" => {
					if seen_idat { return Err(ContainerError::Malformed); }
					trns = Some(data.to_vec());
				},
				b"IDAT" => {
					seen_idat = true;
					idat.extend_from_slice(data);
				},
				b"IEND" => {
					seen_iend = true;
					break;
				},
				_ => {
					// Ancillary chunks pass through; critical strangers are
					// a hard stop.
					if tag[0] & 32 == 0 { return Err(ContainerError::Unsupported); }
					if seen_idat { tail_extra.push((tag, data.to_vec())); }
					else { head_extra.push((tag, data.to_vec())); }
				},
			}

			pos += 12 + len;
		}

		let ihdr = ihdr.ok_or(ContainerError::Malformed)?;
		if ! seen_iend || idat.is_empty() { return Err(ContainerError::Malformed); }
		if ihdr.color_type == 3 && plte.is_none() { return Err(ContainerError::Malformed); }

		Ok(Self { ihdr, plte, trns, idat, head_extra, tail_extra })
	}

	/// # Inflate the IDAT Payload.
	pub(crate) fn raw_idat(&self) -> Result<Vec<u8>, ContainerError> {
		let out = miniz_oxide::inflate::decompress_to_vec_zlib(&self.idat)
			.map_err(|_| ContainerError::Decompress)?;

		// The filtered stream is exactly (rowbytes + 1) * height, except
		// for interlaced images whose pass layout we don't re-derive here.
		if self.ihdr.interlace == 0 &&
			out.len() != (self.ihdr.row_bytes() + 1) * self.ihdr.height as usize
		{
			return Err(ContainerError::Malformed);
		}

		Ok(out)
	}
}



/// # Write One Chunk.
pub(crate) fn write_chunk(out: &mut Vec<u8>, tag: [u8; 4], data: &[u8]) {
	out.extend_from_slice(&(data.len() as u32).to_be_bytes());
	out.extend_from_slice(&tag);
	out.extend_from_slice(data);

	let mut hasher = crc32fast::Hasher::new();
	hasher.update(&tag);
	hasher.update(data);
	out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// # Assemble a Complete PNG.
///
/// `idat_zlib` is the already-wrapped stream; `extras` carry through unless
/// stripping was requested.
pub(crate) fn assemble(
	ihdr: Ihdr,
	plte: Option<&[u8]>,
	trns: Option<&[u8]>,
	idat_zlib: &[u8],
	head_extra: &[([u8; 4], Vec<u8>)],
	tail_extra: &[([u8; 4], Vec<u8>)],
	strip: bool,
) -> Vec<u8> {
	let mut out = Vec::with_capacity(idat_zlib.len() + 256);
	out.extend_from_slice(&SIGNATURE);
	write_chunk(&mut out, *b"IHDR", &ihdr.to_bytes());

	if ! strip {
		for (tag, data) in head_extra { write_chunk(&mut out, *tag, data); }
	}

	if let Some(p) = plte { write_chunk(&mut out, *b"PLTE", p); }
	if let Some(t) = trns {
		if ! t.is_empty() { write_chunk(&mut out, *b"tRNS", t); }
	}

	write_chunk(&mut out, *b"IDAT", idat_zlib);

	if ! strip {
		for (tag, data) in tail_extra { write_chunk(&mut out, *tag, data); }
	}

	write_chunk(&mut out, *b"IEND", &[]);
	out
}

/// # Wrap a Raw Deflate Stream in Zlib Clothing.
pub(crate) fn zlib_wrap(raw: &[u8], deflated: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(deflated.len() + 6);

	// CMF/FLG: 32K window, max-compression hint; the pair must satisfy the
	// mod-31 check.
	out.push(0x78);
	out.push(0xDA);
	out.extend_from_slice(deflated);

	let mut adler = adler32::RollingAdler32::new();
	adler.update_buffer(raw);
	out.extend_from_slice(&adler.hash().to_be_bytes());
	out
}



#[cfg(test)]
mod tests {
	use super::*;

	/// # Build a Tiny Valid PNG (Gray, 2×2).
	pub(crate) fn tiny_png() -> Vec<u8> {
		let ihdr = Ihdr {
			width: 2,
			height: 2,
			bit_depth: 8,
			color_type: 0,
			interlace: 0,
		};

		// Two rows, filter type zero.
		let raw = [0_u8, 10, 20, 0, 30, 40];
		let deflated = miniz_oxide::deflate::compress_to_vec(&raw, 6);
		let idat = zlib_wrap(&raw, &deflated);
		assemble(ihdr, None, None, &idat, &[], &[], false)
	}

	#[test]
	fn t_parse_roundtrip() {
		let png = tiny_png();
		let parsed = PngFile::parse(&png).expect("parse failed");
		assert_eq!(parsed.ihdr.width, 2);
		assert_eq!(parsed.ihdr.height, 2);
		assert_eq!(parsed.ihdr.color_type, 0);

		let raw = parsed.raw_idat().expect("inflate failed");
		assert_eq!(raw, [0, 10, 20, 0, 30, 40]);
	}

	#[test]
	fn t_parse_bad_crc() {
		let mut png = tiny_png();
		// Flip a bit inside IHDR's data.
		png[20] ^= 1;
		assert!(PngFile::parse(&png).is_err());
	}

	#[test]
	fn t_parse_not_png() {
		assert!(PngFile::parse(b"GIF89a~~~~~~~~~~~~~~~~~~~~").is_err());
	}

	#[test]
	fn t_zlib_flags() {
		// The CMF/FLG pair must satisfy the zlib mod-31 rule.
		let wrapped = zlib_wrap(b"", &[]);
		assert_eq!((u16::from(wrapped[0]) * 256 + u16::from(wrapped[1])) % 31, 0);
	}
}
