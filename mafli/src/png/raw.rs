/*!
# Mafli: PNG Scanlines.

Filter math (apply and undo), sample expansion to RGBA-8 for analysis, and
repacking into whatever narrower color mode the reducer settles on.
*/

use crate::{
	error::ContainerError,
	png::{
		chunks::Ihdr,
		color::ColorMode,
	},
};



/// # Paeth Predictor.
pub(crate) fn paeth(a: u8, b: u8, c: u8) -> u8 {
	let p = i16::from(a) + i16::from(b) - i16::from(c);
	let pa = (p - i16::from(a)).abs();
	let pb = (p - i16::from(b)).abs();
	let pc = (p - i16::from(c)).abs();

	if pa <= pb && pa <= pc { a }
	else if pb <= pc { b }
	else { c }
}

/// # Filter One Scanline.
///
/// Writes the filtered representation of `cur` into `out` (same length).
/// `bytewidth` is the per-pixel byte stride, one for sub-byte modes.
pub(crate) fn filter_row(
	out: &mut [u8],
	cur: &[u8],
	prev: Option<&[u8]>,
	bytewidth: usize,
	ftype: u8,
) {
	let left = |i: usize| -> u8 {
		if i >= bytewidth { cur[i - bytewidth] } else { 0 }
	};
	let up = |i: usize| -> u8 { prev.map_or(0, |p| p[i]) };
	let upleft = |i: usize| -> u8 {
		if i >= bytewidth { prev.map_or(0, |p| p[i - bytewidth]) } else { 0 }
	};

	match ftype {
		1 => for i in 0..cur.len() {
			out[i] = cur[i].wrapping_sub(left(i));
		},
		2 => for i in 0..cur.len() {
			out[i] = cur[i].wrapping_sub(up(i));
		},
		3 => for i in 0..cur.len() {
			let avg = ((u16::from(left(i)) + u16::from(up(i))) >> 1) as u8;
			out[i] = cur[i].wrapping_sub(avg);
		},
		4 => for i in 0..cur.len() {
			out[i] = cur[i].wrapping_sub(paeth(left(i), up(i), upleft(i)));
		},
		_ => out.copy_from_slice(cur),
	}
}

/// # Unfilter One Scanline (in Place).
pub(crate) fn unfilter_row(
	cur: &mut [u8],
	prev: Option<&[u8]>,
	bytewidth: usize,
	ftype: u8,
) -> Result<(), ContainerError> {
	match ftype {
		0 => {},
		1 => for i in bytewidth..cur.len() {
			cur[i] = cur[i].wrapping_add(cur[i - bytewidth]);
		},
		2 => if let Some(p) = prev {
			for i in 0..cur.len() { cur[i] = cur[i].wrapping_add(p[i]); }
		},
		3 => for i in 0..cur.len() {
			let a = if i >= bytewidth { cur[i - bytewidth] } else { 0 };
			let b = prev.map_or(0, |p| p[i]);
			cur[i] = cur[i].wrapping_add(((u16::from(a) + u16::from(b)) >> 1) as u8);
		},
		4 => for i in 0..cur.len() {
			let a = if i >= bytewidth { cur[i - bytewidth] } else { 0 };
			let b = prev.map_or(0, |p| p[i]);
			let c = if i >= bytewidth { prev.map_or(0, |p| p[i - bytewidth]) } else { 0 };
			cur[i] = cur[i].wrapping_add(paeth(a, b, c));
		},
		_ => return Err(ContainerError::Malformed),
	}
	Ok(())
}

/// # Unfilter a Whole Image.
///
/// Strips the per-row filter bytes, returning the raw scanlines plus the
/// filter types that were used (handy for `--reuse`).
pub(crate) fn unfilter_image(filtered: &[u8], ihdr: Ihdr)
-> Result<(Vec<u8>, Vec<u8>), ContainerError> {
	let linebytes = ihdr.row_bytes();
	let h = ihdr.height as usize;
	let bytewidth = usize::max(1, (ihdr.bpp_bits() as usize).div_ceil(8));

	if filtered.len() != (linebytes + 1) * h {
		return Err(ContainerError::Malformed);
	}

	let mut rows = vec![0_u8; linebytes * h];
	let mut filters = Vec::with_capacity(h);

	for y in 0..h {
		let ftype = filtered[y * (linebytes + 1)];
		filters.push(ftype);

		let src = &filtered[y * (linebytes + 1) + 1..(y + 1) * (linebytes + 1)];
		let (before, after) = rows.split_at_mut(y * linebytes);
		let cur = &mut after[..linebytes];
		cur.copy_from_slice(src);

		let prev =
			if y == 0 { None }
			else { Some(&before[(y - 1) * linebytes..]) };
		unfilter_row(cur, prev, bytewidth, ftype)?;
	}

	Ok((rows, filters))
}



/// # Expand Raw Rows to RGBA-8.
///
/// Supported: gray and palette at depths 1/2/4/8, and the three multi-
/// channel types at depth 8. Sixteen-bit data is out of scope here; its
/// callers recompress the stream without remodeling.
pub(crate) fn expand_to_rgba(
	rows: &[u8],
	ihdr: Ihdr,
	plte: Option<&[u8]>,
	trns: Option<&[u8]>,
) -> Result<Vec<u8>, ContainerError> {
	if ihdr.bit_depth == 16 { return Err(ContainerError::Unsupported); }

	let w = ihdr.width as usize;
	let h = ihdr.height as usize;
	let linebytes = ihdr.row_bytes();
	let mut out = Vec::with_capacity(w * h * 4);

	match ihdr.color_type {
		// Grayscale.
		0 => {
			let max = (1_u16 << ihdr.bit_depth) - 1;
			let key: Option<u16> = trns.and_then(|t|
				if t.len() >= 2 { Some(u16::from_be_bytes([t[0], t[1]]) & max) }
				else { None }
			);
			for y in 0..h {
				let row = &rows[y * linebytes..(y + 1) * linebytes];
				for x in 0..w {
					let v = read_sample(row, x, ihdr.bit_depth);
					let g = scale_sample(v, ihdr.bit_depth);
					let a = if Some(v) == key { 0 } else { 255 };
					out.extend_from_slice(&[g, g, g, a]);
				}
			}
		},
		// Truecolor.
		2 => {
			let key: Option<[u8; 3]> = trns.and_then(|t|
				if t.len() >= 6 { Some([t[1], t[3], t[5]]) }
				else { None }
			);
			for y in 0..h {
				let row = &rows[y * linebytes..(y + 1) * linebytes];
				for px in row.chunks_exact(3) {
					let rgb = [px[0], px[1], px[2]];
					let a = if Some(rgb) == key { 0 } else { 255 };
					out.extend_from_slice(&[rgb[0], rgb[1], rgb[2], a]);
				}
			}
		},
		// Palette.
		3 => {
			let plte = plte.ok_or(ContainerError::Malformed)?;
			let trns = trns.unwrap_or(&[]);
			for y in 0..h {
				let row = &rows[y * linebytes..(y + 1) * linebytes];
				for x in 0..w {
					let idx = read_sample(row, x, ihdr.bit_depth) as usize;
					if idx * 3 + 2 >= plte.len() { return Err(ContainerError::Malformed); }
					out.extend_from_slice(&[
						plte[idx * 3],
						plte[idx * 3 + 1],
						plte[idx * 3 + 2],
						trns.get(idx).copied().unwrap_or(255),
					]);
				}
			}
		},
		// Gray + alpha.
		4 => {
			for y in 0..h {
				let row = &rows[y * linebytes..(y + 1) * linebytes];
				for px in row.chunks_exact(2) {
					out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
				}
			}
		},
		// Truecolor + alpha.
		6 => out.extend_from_slice(&rows[..w * h * 4]),
		_ => return Err(ContainerError::Unsupported),
	}

	Ok(out)
}

/// # Read a Sub-Byte (or Whole-Byte) Sample.
fn read_sample(row: &[u8], x: usize, depth: u8) -> u16 {
	match depth {
		8 => u16::from(row[x]),
		4 => u16::from((row[x >> 1] >> (4 - 4 * (x & 1))) & 0x0F),
		2 => u16::from((row[x >> 2] >> (6 - 2 * (x & 3))) & 0x03),
		_ => u16::from((row[x >> 3] >> (7 - (x & 7))) & 0x01),
	}
}

/// # Scale a Sample Up to Eight Bits.
fn scale_sample(v: u16, depth: u8) -> u8 {
	match depth {
		8 => v as u8,
		4 => (v * 17) as u8,
		2 => (v * 85) as u8,
		_ => (v * 255) as u8,
	}
}

/// # Pack RGBA-8 Pixels Into a Target Mode's Scanlines.
///
/// Returns the raw (unfiltered) rows. The caller guarantees the mode fits
/// the pixels (the reducer only proposes modes it verified).
pub(crate) fn pack_rows(
	rgba: &[u8],
	width: usize,
	height: usize,
	mode: &ColorMode,
) -> Result<Vec<u8>, ContainerError> {
	let mut out = Vec::new();

	match mode {
		ColorMode::Rgba => out.extend_from_slice(rgba),
		ColorMode::Rgb { key } => {
			for px in rgba.chunks_exact(4) {
				// A keyed pixel writes the key triple instead of its
				// (meaningless) hidden colors.
				if px[3] == 0 {
					let k = (*key).ok_or(ContainerError::Encoder)?;
					out.extend_from_slice(&k);
				}
				else { out.extend_from_slice(&px[..3]); }
			}
		},
		ColorMode::Gray { key } => {
			for px in rgba.chunks_exact(4) {
				if px[3] == 0 {
					out.push((*key).ok_or(ContainerError::Encoder)?);
				}
				else { out.push(px[0]); }
			}
		},
		ColorMode::GrayAlpha => {
			for px in rgba.chunks_exact(4) {
				out.push(px[0]);
				out.push(px[3]);
			}
		},
		ColorMode::Palette { palette, depth } => {
			// Index every pixel against the palette order.
			let mut lookup = std::collections::HashMap::with_capacity(palette.len());
			for (i, c) in palette.iter().enumerate() { lookup.entry(*c).or_insert(i as u8); }

			let linebytes = (width * usize::from(*depth)).div_ceil(8);
			out.resize(linebytes * height, 0);
			for y in 0..height {
				for x in 0..width {
					let p = (y * width + x) * 4;
					let px = [rgba[p], rgba[p + 1], rgba[p + 2], rgba[p + 3]];
					let idx = *lookup.get(&px).ok_or(ContainerError::Encoder)?;
					write_sample(&mut out[y * linebytes..(y + 1) * linebytes], x, *depth, idx);
				}
			}
		},
	}

	Ok(out)
}

/// # Write a Sub-Byte (or Whole-Byte) Sample.
fn write_sample(row: &mut [u8], x: usize, depth: u8, v: u8) {
	match depth {
		8 => { row[x] = v; },
		4 => { row[x >> 1] |= (v & 0x0F) << (4 - 4 * (x & 1)); },
		2 => { row[x >> 2] |= (v & 0x03) << (6 - 2 * (x & 3)); },
		_ => { row[x >> 3] |= (v & 0x01) << (7 - (x & 7)); },
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_filter_roundtrip() {
		// Every filter type must unfilter back to the source, with and
		// without a previous row.
		let cur = [12_u8, 250, 3, 80, 80, 80, 7, 200];
		let prev = [1_u8, 2, 3, 4, 200, 199, 17, 0];

		for bytewidth in [1_usize, 3, 4] {
			for ftype in 0..5_u8 {
				for p in [None, Some(prev.as_slice())] {
					let mut filtered = [0_u8; 8];
					filter_row(&mut filtered, &cur, p, bytewidth, ftype);

					let mut back = filtered;
					unfilter_row(&mut back, p, bytewidth, ftype).unwrap();
					assert_eq!(back, cur, "filter {ftype} bw {bytewidth} did not invert");
				}
			}
		}
	}

	#[test]
	fn t_paeth() {
		// RFC 2083's tie rules: left wins ties, then up.
		assert_eq!(paeth(1, 1, 1), 1);
		assert_eq!(paeth(10, 20, 15), 10);
		assert_eq!(paeth(0, 0, 255), 0);
	}

	#[test]
	fn t_samples() {
		let mut row = [0_u8; 2];
		for (x, v) in [(0, 2_u8), (1, 1), (2, 3), (3, 0), (4, 2)] {
			write_sample(&mut row, x, 2, v);
		}
		for (x, v) in [(0, 2_u16), (1, 1), (2, 3), (3, 0), (4, 2)] {
			assert_eq!(read_sample(&row, x, 2), v);
		}
	}

	#[test]
	fn t_expand_palette() {
		let ihdr = Ihdr { width: 4, height: 1, bit_depth: 2, color_type: 3, interlace: 0 };
		let plte = [255_u8, 0, 0, 0, 255, 0, 0, 0, 255, 9, 9, 9];
		// Indices 0, 1, 2, 3 packed two bits each.
		let rows = [0b0001_1011_u8];
		let rgba = expand_to_rgba(&rows, ihdr, Some(&plte), None).unwrap();
		assert_eq!(rgba, [
			255, 0, 0, 255,
			0, 255, 0, 255,
			0, 0, 255, 255,
			9, 9, 9, 255,
		]);
	}
}
