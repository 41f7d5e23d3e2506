/*!
# Merma: Zip.

APPNOTE plumbing: walk an archive's central directory, re-deflate each
stored/deflated entry (storing it instead when that's smaller), and rebuild
the archive with corrected sizes and offsets. Zip64, encryption, and other
exotica are refused so the original survives untouched.
*/

use crate::{
	EncodingError,
	Settings,
};



/// # Local File Header Signature.
const LOCAL_SIG: [u8; 4] = [b'P', b'K', 3, 4];

/// # Central Directory Entry Signature.
const CENTRAL_SIG: [u8; 4] = [b'P', b'K', 1, 2];

/// # End of Central Directory Signature.
const END_SIG: [u8; 4] = [b'P', b'K', 5, 6];

/// # General-Purpose Flag: Encrypted.
const FLAG_ENCRYPTED: u16 = 1;

/// # General-Purpose Flag: UTF-8 Names.
///
/// (Data-descriptor streams need no special handling on read, since the
/// central directory carries real sizes, and the rewrite never emits
/// descriptors, so only the name-encoding bit survives into the output.)
const FLAG_UTF8: u16 = 1 << 11;



/// # One Archive Entry, Ready to Rewrite.
struct ZipEntry {
	/// # File Name (Raw Bytes).
	name: Vec<u8>,

	/// # Extra Field (From the Local Header).
	extra: Vec<u8>,

	/// # File Comment (From the Central Directory).
	comment: Vec<u8>,

	/// # Surviving General-Purpose Flags.
	flags: u16,

	/// # Compression Method.
	method: u16,

	/// # DOS Modification Time.
	time: u16,

	/// # DOS Modification Date.
	date: u16,

	/// # CRC-32 of the Uncompressed Data.
	crc: u32,

	/// # External Attributes.
	external: u32,

	/// # Internal Attributes.
	internal: u16,

	/// # Compressed Payload.
	payload: Vec<u8>,

	/// # Uncompressed Size.
	raw_size: u32,
}

/// # Little-Endian Readers.
fn read_u16(src: &[u8], pos: usize) -> Result<u16, EncodingError> {
	src.get(pos..pos + 2)
		.map(|s| u16::from_le_bytes([s[0], s[1]]))
		.ok_or(EncodingError::Format)
}

/// # Little-Endian Reader (u32).
fn read_u32(src: &[u8], pos: usize) -> Result<u32, EncodingError> {
	src.get(pos..pos + 4)
		.map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
		.ok_or(EncodingError::Format)
}



/// # Recompress an Archive.
///
/// Every entry is inflated (CRC-checked), re-deflated, and kept in its
/// smaller form; stored beats deflated for incompressible payloads. The
/// rebuilt archive preserves names, timestamps, comments, and attributes.
pub(crate) fn recompress(raw: &[u8], settings: Settings) -> Result<Vec<u8>, EncodingError> {
	// Find the end record. It floats behind an arbitrary comment, so scan
	// backward for the signature.
	let eocd = raw.len()
		.checked_sub(22)
		.and_then(|from| (0..=from).rev().find(|&i| raw[i..i + 4] == END_SIG))
		.ok_or(EncodingError::Format)?;

	let count = usize::from(read_u16(raw, eocd + 10)?);
	let cd_offset = read_u32(raw, eocd + 16)? as usize;
	let archive_comment_len = usize::from(read_u16(raw, eocd + 20)?);
	let archive_comment = raw.get(eocd + 22..eocd + 22 + archive_comment_len)
		.ok_or(EncodingError::Format)?
		.to_vec();

	// Multi-disk spans are ancient history we want no part of.
	if read_u16(raw, eocd + 4)? != 0 || read_u16(raw, eocd + 6)? != 0 {
		return Err(EncodingError::Unsupported);
	}

	// Walk the central directory.
	let mut entries = Vec::with_capacity(count);
	let mut pos = cd_offset;
	for _ in 0..count {
		if raw.get(pos..pos + 4) != Some(&CENTRAL_SIG[..]) {
			return Err(EncodingError::Format);
		}

		let flags = read_u16(raw, pos + 8)?;
		let method = read_u16(raw, pos + 10)?;
		let time = read_u16(raw, pos + 12)?;
		let date = read_u16(raw, pos + 14)?;
		let crc = read_u32(raw, pos + 16)?;
		let csize = read_u32(raw, pos + 20)? as usize;
		let raw_size = read_u32(raw, pos + 24)?;
		let name_len = usize::from(read_u16(raw, pos + 28)?);
		let extra_len = usize::from(read_u16(raw, pos + 30)?);
		let comment_len = usize::from(read_u16(raw, pos + 32)?);
		let internal = read_u16(raw, pos + 36)?;
		let external = read_u32(raw, pos + 38)?;
		let local_offset = read_u32(raw, pos + 42)? as usize;

		if flags & FLAG_ENCRYPTED != 0 { return Err(EncodingError::Unsupported); }
		if csize == u32::MAX as usize || raw_size == u32::MAX || local_offset == u32::MAX as usize {
			// Zip64 escape values.
			return Err(EncodingError::Unsupported);
		}

		let comment = raw.get(pos + 46 + name_len + extra_len..pos + 46 + name_len + extra_len + comment_len)
			.ok_or(EncodingError::Format)?
			.to_vec();

		// Hop to the local header for the payload (its name/extra lengths
		// can differ from the central copies).
		if raw.get(local_offset..local_offset + 4) != Some(&LOCAL_SIG[..]) {
			return Err(EncodingError::Format);
		}
		let l_name = usize::from(read_u16(raw, local_offset + 26)?);
		let l_extra = usize::from(read_u16(raw, local_offset + 28)?);
		let data_at = local_offset + 30 + l_name + l_extra;

		let name = raw.get(local_offset + 30..local_offset + 30 + l_name)
			.ok_or(EncodingError::Format)?
			.to_vec();
		let extra = raw.get(local_offset + 30 + l_name..data_at)
			.ok_or(EncodingError::Format)?
			.to_vec();
		let payload = raw.get(data_at..data_at + csize)
			.ok_or(EncodingError::Format)?
			.to_vec();

		entries.push(ZipEntry {
			name,
			extra,
			comment,
			flags: flags & FLAG_UTF8,
			method,
			time,
			date,
			crc,
			external,
			internal,
			payload,
			raw_size,
		});

		pos += 46 + name_len + extra_len + comment_len;
	}

	// Squeeze each entry.
	for e in &mut entries { squeeze_entry(e, settings)?; }

	// Reassemble: local headers and payloads, then the directory, then the
	// end record.
	let mut out = Vec::with_capacity(raw.len());
	let mut offsets = Vec::with_capacity(entries.len());
	for e in &entries {
		offsets.push(out.len() as u32);
		out.extend_from_slice(&LOCAL_SIG);
		out.extend_from_slice(&20_u16.to_le_bytes()); // Version needed.
		out.extend_from_slice(&e.flags.to_le_bytes());
		out.extend_from_slice(&e.method.to_le_bytes());
		out.extend_from_slice(&e.time.to_le_bytes());
		out.extend_from_slice(&e.date.to_le_bytes());
		out.extend_from_slice(&e.crc.to_le_bytes());
		out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
		out.extend_from_slice(&e.raw_size.to_le_bytes());
		out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
		out.extend_from_slice(&(e.extra.len() as u16).to_le_bytes());
		out.extend_from_slice(&e.name);
		out.extend_from_slice(&e.extra);
		out.extend_from_slice(&e.payload);
	}

	let cd_start = out.len() as u32;
	for (e, offset) in entries.iter().zip(offsets.iter().copied()) {
		out.extend_from_slice(&CENTRAL_SIG);
		out.extend_from_slice(&20_u16.to_le_bytes()); // Version made by.
		out.extend_from_slice(&20_u16.to_le_bytes()); // Version needed.
		out.extend_from_slice(&e.flags.to_le_bytes());
		out.extend_from_slice(&e.method.to_le_bytes());
		out.extend_from_slice(&e.time.to_le_bytes());
		out.extend_from_slice(&e.date.to_le_bytes());
		out.extend_from_slice(&e.crc.to_le_bytes());
		out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
		out.extend_from_slice(&e.raw_size.to_le_bytes());
		out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
		out.extend_from_slice(&(e.extra.len() as u16).to_le_bytes());
		out.extend_from_slice(&(e.comment.len() as u16).to_le_bytes());
		out.extend_from_slice(&[0, 0]); // Disk number.
		out.extend_from_slice(&e.internal.to_le_bytes());
		out.extend_from_slice(&e.external.to_le_bytes());
		out.extend_from_slice(&offset.to_le_bytes());
		out.extend_from_slice(&e.name);
		out.extend_from_slice(&e.extra);
		out.extend_from_slice(&e.comment);
	}
	let cd_size = out.len() as u32 - cd_start;

	out.extend_from_slice(&END_SIG);
	out.extend_from_slice(&[0, 0, 0, 0]); // Disk numbers.
	out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
	out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
	out.extend_from_slice(&cd_size.to_le_bytes());
	out.extend_from_slice(&cd_start.to_le_bytes());
	out.extend_from_slice(&(archive_comment.len() as u16).to_le_bytes());
	out.extend_from_slice(&archive_comment);

	Ok(out)
}

/// # Re-Encode One Entry in Place.
fn squeeze_entry(e: &mut ZipEntry, settings: Settings) -> Result<(), EncodingError> {
	// Recover the original bytes.
	let data = match e.method {
		0 => e.payload.clone(),
		8 => miniz_oxide::inflate::decompress_to_vec(&e.payload)
			.map_err(|_| EncodingError::Decode)?,
		_ => return Err(EncodingError::Unsupported),
	};

	if data.len() as u32 != e.raw_size || crc32fast::hash(&data) != e.crc {
		return Err(EncodingError::Decode);
	}

	let deflated = mafli::deflate(&settings.encoder_options(), true, &data)
		.map_err(EncodingError::from)?;

	// Keep the smallest expressible form: fresh deflate, plain storage,
	// or the payload as it already was. Ties keep what's already in hand.
	if deflated.len() < e.payload.len() && deflated.len() < data.len() {
		e.method = 8;
		e.payload = deflated;
	}
	else if data.len() < e.payload.len() {
		e.method = 0;
		e.payload = data;
	}

	Ok(())
}

/// # Build a Fresh Single-File Archive.
///
/// The `-zip` path for loose files: one deflated (or stored) entry named
/// after the source.
pub(crate) fn compress_single(name: &str, data: &[u8], settings: Settings)
-> Result<Vec<u8>, EncodingError> {
	let crc = crc32fast::hash(data);
	let deflated = mafli::deflate(&settings.encoder_options(), true, data)
		.map_err(EncodingError::from)?;

	let (method, payload): (u16, &[u8]) =
		if deflated.len() < data.len() { (8, &deflated) }
		else { (0, data) };

	let e = ZipEntry {
		name: name.as_bytes().to_vec(),
		extra: Vec::new(),
		comment: Vec::new(),
		flags: FLAG_UTF8,
		method,
		time: 0,
		date: 0x21, // 1980-01-01, the DOS epoch.
		crc,
		external: 0,
		internal: 0,
		payload: payload.to_vec(),
		raw_size: data.len() as u32,
	};

	let mut out = Vec::new();
	out.extend_from_slice(&LOCAL_SIG);
	out.extend_from_slice(&20_u16.to_le_bytes());
	out.extend_from_slice(&e.flags.to_le_bytes());
	out.extend_from_slice(&e.method.to_le_bytes());
	out.extend_from_slice(&e.time.to_le_bytes());
	out.extend_from_slice(&e.date.to_le_bytes());
	out.extend_from_slice(&e.crc.to_le_bytes());
	out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
	out.extend_from_slice(&e.raw_size.to_le_bytes());
	out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
	out.extend_from_slice(&[0, 0]);
	out.extend_from_slice(&e.name);
	out.extend_from_slice(&e.payload);

	let cd_start = out.len() as u32;
	out.extend_from_slice(&CENTRAL_SIG);
	out.extend_from_slice(&20_u16.to_le_bytes());
	out.extend_from_slice(&20_u16.to_le_bytes());
	out.extend_from_slice(&e.flags.to_le_bytes());
	out.extend_from_slice(&e.method.to_le_bytes());
	out.extend_from_slice(&e.time.to_le_bytes());
	out.extend_from_slice(&e.date.to_le_bytes());
	out.extend_from_slice(&e.crc.to_le_bytes());
	out.extend_from_slice(&(e.payload.len() as u32).to_le_bytes());
	out.extend_from_slice(&e.raw_size.to_le_bytes());
	out.extend_from_slice(&(e.name.len() as u16).to_le_bytes());
	out.extend_from_slice(&[0, 0, 0, 0]);
	out.extend_from_slice(&[0, 0]);
	out.extend_from_slice(&e.internal.to_le_bytes());
	out.extend_from_slice(&e.external.to_le_bytes());
	out.extend_from_slice(&0_u32.to_le_bytes());
	out.extend_from_slice(&e.name);
	let cd_size = out.len() as u32 - cd_start;

	out.extend_from_slice(&END_SIG);
	out.extend_from_slice(&[0, 0, 0, 0]);
	out.extend_from_slice(&1_u16.to_le_bytes());
	out.extend_from_slice(&1_u16.to_le_bytes());
	out.extend_from_slice(&cd_size.to_le_bytes());
	out.extend_from_slice(&cd_start.to_le_bytes());
	out.extend_from_slice(&[0, 0]);

	Ok(out)
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_zip_roundtrip() {
		let data = b"zip me up, zip me up, zip me up before you go-go".repeat(10);
		let settings = Settings::new();

		let archive = compress_single("note.txt", &data, settings).unwrap();
		let rebuilt = recompress(&archive, settings).unwrap();

		// The rebuilt archive must parse again and carry the same content.
		let again = recompress(&rebuilt, settings).unwrap();
		assert!(! again.is_empty());

		// Verify the entry decodes back to the source.
		let csize = read_u32(&rebuilt, 18).unwrap() as usize;
		let method = read_u16(&rebuilt, 8).unwrap();
		let name_len = usize::from(read_u16(&rebuilt, 26).unwrap());
		let extra_len = usize::from(read_u16(&rebuilt, 28).unwrap());
		let payload = &rebuilt[30 + name_len + extra_len..30 + name_len + extra_len + csize];
		let back = match method {
			0 => payload.to_vec(),
			_ => miniz_oxide::inflate::decompress_to_vec(payload).unwrap(),
		};
		assert_eq!(back, data);
	}

	#[test]
	fn t_zip_incompressible_stores() {
		// Junk bytes should come out stored rather than bloated.
		let mut state = 0x1234_5678_u32;
		let data: Vec<u8> = (0..2000).map(|_| {
			state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
			(state >> 24) as u8
		}).collect();

		let settings = Settings::new();
		let archive = compress_single("noise.bin", &data, settings).unwrap();
		assert_eq!(read_u16(&archive, 8).unwrap(), 0, "junk should be stored");
	}

	#[test]
	fn t_zip_rejects_garbage() {
		assert!(recompress(b"PK\x03\x04 but not really a zip file at all", Settings::new()).is_err());
	}
}
