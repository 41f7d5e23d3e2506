/*!
# Mafli: PNG Optimization.

The whole-file pipeline: decode, (optionally) scrub invisible pixels, try
narrower color models, hunt per-row filters, squeeze the stream, and keep
whichever rendition came out smallest, the original included.
*/

pub(crate) mod chunks;
pub(crate) mod color;
pub(crate) mod filters;
pub(crate) mod raw;

use crate::{
	blocks,
	EncoderOptions,
	error::ContainerError,
};
use chunks::PngFile;
use color::{
	ColorMode,
	ColorStats,
	PALETTE_SORTS,
};
use filters::{
	Filterer,
	FilterStrategy,
};



#[derive(Debug, Clone)]
/// # PNG Optimization Options.
pub struct PngOptions {
	/// # Encoder Settings.
	pub encoder: EncoderOptions,

	/// # Drop Ancillary Chunks?
	pub strip: bool,

	/// # Strict Losslessness?
	///
	/// Forbids rewriting the hidden channels of fully-transparent pixels.
	pub strict: bool,

	/// # Keep the Original Filters and Color Type?
	pub reuse: bool,

	/// # Try Every Filter Strategy?
	pub all_filters: bool,

	/// # Include the Brute-Force Family Too?
	pub all_filters_brute: bool,

	/// # Palette Orderings to Try (0..=120).
	pub pal_sort: u8,

	/// # Keep Quiet?
	pub quiet: bool,
}

impl PngOptions {
	#[must_use]
	/// # From a Compression Level.
	pub fn from_level(level: u8) -> Self {
		let mut encoder = EncoderOptions::from_level(level);
		encoder.png = true;
		Self {
			encoder,
			strip: false,
			strict: false,
			reuse: false,
			all_filters: false,
			all_filters_brute: false,
			pal_sort: 0,
			quiet: true,
		}
	}

	/// # The Strategy List This Configuration Wants.
	fn strategies(&self) -> Vec<FilterStrategy> {
		let mut out: Vec<FilterStrategy> =
			if self.all_filters {
				let mut all = vec![
					FilterStrategy::Entropy,
					FilterStrategy::MinSum,
					FilterStrategy::DistinctBytes,
					FilterStrategy::DistinctBigrams,
					FilterStrategy::Fixed(0),
					FilterStrategy::Fixed(1),
					FilterStrategy::Fixed(2),
					FilterStrategy::Fixed(3),
					FilterStrategy::Fixed(4),
					FilterStrategy::Incremental,
					FilterStrategy::Incremental2,
					FilterStrategy::Incremental3,
					FilterStrategy::AllCheap,
				];
				if self.all_filters_brute {
					all.push(FilterStrategy::BruteForce);
					all.push(FilterStrategy::Genetic);
				}
				all
			}
			else if self.encoder.iterations <= 1 {
				vec![FilterStrategy::Entropy]
			}
			else if self.encoder.iterations < 15 {
				vec![FilterStrategy::Entropy, FilterStrategy::MinSum]
			}
			else {
				vec![
					FilterStrategy::Entropy,
					FilterStrategy::MinSum,
					FilterStrategy::Fixed(0),
					FilterStrategy::DistinctBigrams,
				]
			};

		out.dedup();
		out
	}
}



/// # Deflate Backend.
///
/// The PNG pipeline drives its compressor through this seam so the filter
/// and color searches don't care who, exactly, is squeezing.
trait Deflater {
	/// # Compress to a Raw DEFLATE Stream.
	fn compress(&self, input: &[u8]) -> Result<Vec<u8>, ContainerError>;
}

impl Deflater for EncoderOptions {
	#[inline]
	fn compress(&self, input: &[u8]) -> Result<Vec<u8>, ContainerError> {
		blocks::deflate(self, true, input)
	}
}



/// # Optimize a PNG.
///
/// Returns a byte-for-byte valid PNG that decodes to the same pixels as the
/// input and is never larger than it. (When nothing helps, the input comes
/// straight back.)
///
/// ## Errors
///
/// Malformed or unsupported files error out so the caller can report them;
/// the original is never harmed either way.
pub fn optimize_png(src: &[u8], options: &PngOptions) -> Result<Vec<u8>, ContainerError> {
	let png = PngFile::parse(src)?;
	let raw_filtered = png.raw_idat()?;

	// Sixteen-bit and interlaced images keep their shape; only the stream
	// gets requeezed.
	let candidate =
		if png.ihdr.bit_depth == 16 || png.ihdr.interlace != 0 {
			stream_only(&png, &raw_filtered, options)?
		}
		else { remodel(&png, &raw_filtered, options)? };

	if candidate.len() < src.len() { Ok(candidate) }
	else { Ok(src.to_vec()) }
}

/// # Filter and Deflate Raw Rows.
///
/// The stripped-down entry point for callers that already hold raw
/// scanlines: runs the configured filter strategies over them and returns
/// the smallest raw DEFLATE stream of the filtered data.
///
/// ## Errors
///
/// Returns an error if the geometry doesn't describe the buffer, or the
/// encoder trips an internal check.
pub fn optimize_filter_then_deflate(
	rows: &[u8],
	width: u32,
	height: u32,
	bpp_bits: u32,
	options: &PngOptions,
) -> Result<Vec<u8>, ContainerError> {
	let linebytes = ((u64::from(width) * u64::from(bpp_bits)).div_ceil(8)) as usize;
	let h = height as usize;
	if linebytes == 0 || rows.len() != linebytes * h {
		return Err(ContainerError::Malformed);
	}

	let bytewidth = usize::max(1, (bpp_bits as usize).div_ceil(8));
	let (_, deflated) = best_stream(
		rows,
		linebytes,
		h,
		bytewidth,
		false,
		&options.strategies(),
		options,
	)?;
	Ok(deflated)
}



/// # Recompress Without Remodeling.
fn stream_only(
	png: &PngFile,
	raw_filtered: &[u8],
	options: &PngOptions,
) -> Result<Vec<u8>, ContainerError> {
	let deflated = options.encoder.compress(raw_filtered)?;
	let idat = chunks::zlib_wrap(raw_filtered, &deflated);
	Ok(chunks::assemble(
		png.ihdr,
		png.plte.as_deref(),
		png.trns.as_deref(),
		&idat,
		&png.head_extra,
		&png.tail_extra,
		options.strip,
	))
}

/// # The Full Works.
fn remodel(
	png: &PngFile,
	raw_filtered: &[u8],
	options: &PngOptions,
) -> Result<Vec<u8>, ContainerError> {
	let ihdr = png.ihdr;
	let w = ihdr.width as usize;
	let h = ihdr.height as usize;

	let (rows, old_filters) = raw::unfilter_image(raw_filtered, ihdr)?;

	// Reuse mode re-applies the original filters to the original rows and
	// only fights over the DEFLATE stream.
	if options.reuse {
		let bytewidth = usize::max(1, (ihdr.bpp_bits() as usize).div_ceil(8));
		let (filtered, deflated) = best_stream(
			&rows,
			ihdr.row_bytes(),
			h,
			bytewidth,
			false,
			&[FilterStrategy::Predefined(old_filters)],
			options,
		)?;
		let idat = chunks::zlib_wrap(&filtered, &deflated);
		return Ok(chunks::assemble(
			ihdr,
			png.plte.as_deref(),
			png.trns.as_deref(),
			&idat,
			&png.head_extra,
			&png.tail_extra,
			options.strip,
		));
	}

	let mut rgba = raw::expand_to_rgba(&rows, ihdr, png.plte.as_deref(), png.trns.as_deref())?;

	// Unify the hidden colors of fully-transparent pixels up front: it
	// keeps the distinct-color count honest for the palette/key analysis.
	// The per-filter predictor rewrite happens later, per trial.
	if ! options.strict {
		let first = rgba.chunks_exact(4)
			.find(|px| px[3] == 0)
			.map(|px| [px[0], px[1], px[2]]);
		if let Some(t) = first {
			for px in rgba.chunks_exact_mut(4) {
				if px[3] == 0 {
					px[0] = t[0];
					px[1] = t[1];
					px[2] = t[2];
				}
			}
		}
	}

	let stats = ColorStats::scan(&rgba);
	let chosen = stats.choose(w * h);

	// The candidate modes: the reducer's pick, palette re-orderings of it,
	// and (for small outputs) the unindexed fallback for comparison.
	let mut modes: Vec<ColorMode> = vec![chosen.clone()];
	if let ColorMode::Palette { palette, depth } = &chosen {
		for s in 0..options.pal_sort.min(PALETTE_SORTS) {
			let mut sorted = palette.clone();
			color::sort_palette(&mut sorted, &rgba, w, h, s);
			if sorted != *palette {
				modes.push(ColorMode::Palette { palette: sorted, depth: *depth });
			}
		}
	}

	let strategies = options.strategies();
	let mut best: Option<Vec<u8>> = None;

	for mode in &modes {
		let candidate = try_mode(png, &rgba, mode, &strategies, options)?;
		if best.as_ref().is_none_or(|b| candidate.len() < b.len()) {
			best = Some(candidate);
		}
	}

	// For very small outputs, the palette storage overhead can outweigh its
	// pixel savings; double-check against the wide rendition.
	if matches!(chosen, ColorMode::Palette { .. }) {
		let small = best.as_ref().is_some_and(|b| b.len() < 4096) && w * h < 45_000;
		if small {
			let candidate = try_mode(png, &rgba, &stats.wide(), &strategies, options)?;
			if best.as_ref().is_none_or(|b| candidate.len() < b.len()) {
				best = Some(candidate);
			}
		}
	}

	best.ok_or(ContainerError::Encoder)
}

/// # Render One Color Mode.
fn try_mode(
	png: &PngFile,
	rgba: &[u8],
	mode: &ColorMode,
	strategies: &[FilterStrategy],
	options: &PngOptions,
) -> Result<Vec<u8>, ContainerError> {
	let w = png.ihdr.width as usize;
	let h = png.ihdr.height as usize;

	let rows = raw::pack_rows(rgba, w, h, mode)?;
	let ihdr2 = mode.ihdr(png.ihdr.width, png.ihdr.height);
	let bytewidth = usize::max(1, (ihdr2.bpp_bits() as usize).div_ceil(8));

	// The predictor rewrite needs a full alpha channel to hide behind.
	let clean = ! options.strict && matches!(mode, ColorMode::Rgba);

	let (filtered, deflated) = best_stream(
		&rows,
		ihdr2.row_bytes(),
		h,
		bytewidth,
		clean,
		strategies,
		options,
	)?;
	let idat = chunks::zlib_wrap(&filtered, &deflated);

	let plte = mode.plte();
	let trns = mode.trns();
	Ok(chunks::assemble(
		ihdr2,
		plte.as_deref(),
		trns.as_deref(),
		&idat,
		&png.head_extra,
		&png.tail_extra,
		options.strip,
	))
}

/// # Smallest Stream Across Strategies.
fn best_stream(
	rows: &[u8],
	linebytes: usize,
	h: usize,
	bytewidth: usize,
	clean: bool,
	strategies: &[FilterStrategy],
	options: &PngOptions,
) -> Result<(Vec<u8>, Vec<u8>), ContainerError> {
	let filterer = Filterer::new(rows, linebytes, h, bytewidth, clean);
	let mut best: Option<(Vec<u8>, Vec<u8>)> = None;

	for strategy in strategies {
		let filtered = filterer.run(strategy, options.quiet);
		let deflated = options.encoder.compress(&filtered)?;
		if best.as_ref().is_none_or(|(_, d)| deflated.len() < d.len()) {
			best = Some((filtered, deflated));
		}
	}

	best.ok_or(ContainerError::Encoder)
}



#[cfg(test)]
mod tests {
	use super::*;
	use chunks::Ihdr;

	/// # Assemble a Valid PNG From RGBA Pixels (Stored Un-Reduced).
	fn build_rgba_png(rgba: &[u8], w: u32, h: u32) -> Vec<u8> {
		let ihdr = Ihdr {
			width: w,
			height: h,
			bit_depth: 8,
			color_type: 6,
			interlace: 0,
		};

		// Filter type zero on every row.
		let linebytes = (w as usize) * 4;
		let mut filtered = Vec::with_capacity((linebytes + 1) * h as usize);
		for y in 0..h as usize {
			filtered.push(0);
			filtered.extend_from_slice(&rgba[y * linebytes..(y + 1) * linebytes]);
		}

		let deflated = miniz_oxide::deflate::compress_to_vec(&filtered, 6);
		let idat = chunks::zlib_wrap(&filtered, &deflated);
		chunks::assemble(ihdr, None, None, &idat, &[], &[], false)
	}

	/// # Decode Any Supported PNG Back to RGBA.
	fn decode_rgba(png: &[u8]) -> Vec<u8> {
		let parsed = PngFile::parse(png).expect("output failed to parse");
		let raw_filtered = parsed.raw_idat().expect("output failed to inflate");
		let (rows, _) = raw::unfilter_image(&raw_filtered, parsed.ihdr)
			.expect("output failed to unfilter");
		raw::expand_to_rgba(
			&rows,
			parsed.ihdr,
			parsed.plte.as_deref(),
			parsed.trns.as_deref(),
		).expect("output failed to expand")
	}

	#[test]
	fn t_gradient() {
		// A 4×4 gray ramp stored as RGBA. The output must decode to the
		// same pixels and must not be bigger.
		let mut rgba = Vec::new();
		for r0 in [10_u8, 50, 90, 130] {
			for x in 0..4_u8 {
				let v = r0 + x;
				rgba.extend_from_slice(&[v, v, v, 255]);
			}
		}

		let src = build_rgba_png(&rgba, 4, 4);
		let out = optimize_png(&src, &PngOptions::from_level(3)).expect("optimize failed");

		assert!(out.len() <= src.len());
		assert_eq!(decode_rgba(&out), rgba);
	}

	#[test]
	fn t_palette_reduction() {
		// 16×16 with four opaque colors: the output should be indexed at
		// two bits, pixels intact.
		const COLORS: [[u8; 4]; 4] = [
			[255, 0, 0, 255],
			[0, 255, 0, 255],
			[0, 0, 255, 255],
			[32, 32, 32, 255],
		];
		let mut rgba = Vec::new();
		for i in 0..256_usize {
			rgba.extend_from_slice(&COLORS[(i / 7) % 4]);
		}

		let src = build_rgba_png(&rgba, 16, 16);
		let out = optimize_png(&src, &PngOptions::from_level(3)).expect("optimize failed");

		assert!(out.len() <= src.len());
		assert_eq!(decode_rgba(&out), rgba);

		let parsed = PngFile::parse(&out).unwrap();
		assert_eq!(parsed.ihdr.color_type, 3, "expected an indexed output");
		assert_eq!(parsed.ihdr.bit_depth, 2);
		assert_eq!(parsed.plte.map(|p| p.len() / 3), Some(4));
	}

	#[test]
	fn t_pal_sort() {
		// Palette re-orderings must not change the pixels.
		const COLORS: [[u8; 4]; 5] = [
			[250, 10, 10, 255],
			[10, 250, 10, 255],
			[10, 10, 250, 255],
			[200, 200, 0, 255],
			[0, 0, 0, 255],
		];
		let mut rgba = Vec::new();
		for i in 0..1024_usize {
			rgba.extend_from_slice(&COLORS[(i / 3) % 5]);
		}

		let src = build_rgba_png(&rgba, 32, 32);
		let mut options = PngOptions::from_level(2);
		options.pal_sort = 12;
		let out = optimize_png(&src, &options).expect("optimize failed");
		assert_eq!(decode_rgba(&out), rgba);
	}

	#[test]
	fn t_transparent_cleaning() {
		// Hidden colors of fully transparent pixels may change; everything
		// else must not.
		let mut rgba = Vec::new();
		for i in 0..64_usize {
			if i % 5 == 0 { rgba.extend_from_slice(&[99, 3, 77, 0]); }
			else if i % 3 == 0 { rgba.extend_from_slice(&[10, 200, 30, 128]); }
			else { rgba.extend_from_slice(&[(i as u8) * 2, 0, 255, 255]); }
		}

		let src = build_rgba_png(&rgba, 8, 8);
		let out = optimize_png(&src, &PngOptions::from_level(3)).expect("optimize failed");
		let back = decode_rgba(&out);

		assert_eq!(back.len(), rgba.len());
		for (a, b) in back.chunks_exact(4).zip(rgba.chunks_exact(4)) {
			assert_eq!(a[3], b[3], "alpha must never change");
			if b[3] != 0 { assert_eq!(a, b, "visible pixels must never change"); }
		}

		// Strict mode preserves even the invisible channels.
		let mut options = PngOptions::from_level(3);
		options.strict = true;
		let out = optimize_png(&src, &options).expect("optimize failed");
		assert_eq!(decode_rgba(&out), rgba);
	}

	#[test]
	fn t_cancelled_genetic() {
		// With cancellation already flagged, the brute/genetic pass still
		// returns a valid, decodable image.
		let mut rgba = Vec::new();
		for i in 0..64_usize {
			let v = (i as u8).wrapping_mul(37);
			rgba.extend_from_slice(&[v, v ^ 3, v / 2, 255]);
		}
		let src = build_rgba_png(&rgba, 8, 8);

		let mut options = PngOptions::from_level(1);
		options.all_filters = true;
		options.all_filters_brute = true;

		crate::CANCELLED.store(true, std::sync::atomic::Ordering::Relaxed);
		let out = optimize_png(&src, &options).expect("optimize failed");
		crate::CANCELLED.store(false, std::sync::atomic::Ordering::Relaxed);

		assert_eq!(decode_rgba(&out), rgba);
	}

	#[test]
	fn t_stream_only_16bit() {
		// A 16-bit gray image keeps its shape; only the stream shrinks (or
		// the original survives).
		let ihdr = Ihdr { width: 4, height: 2, bit_depth: 16, color_type: 0, interlace: 0 };
		let mut filtered = Vec::new();
		for _ in 0..2 {
			filtered.push(0);
			for x in 0..4_u16 { filtered.extend_from_slice(&(x * 4096).to_be_bytes()); }
		}
		let deflated = miniz_oxide::deflate::compress_to_vec(&filtered, 1);
		let idat = chunks::zlib_wrap(&filtered, &deflated);
		let src = chunks::assemble(ihdr, None, None, &idat, &[], &[], false);

		let out = optimize_png(&src, &PngOptions::from_level(2)).expect("optimize failed");
		assert!(out.len() <= src.len());

		let parsed = PngFile::parse(&out).unwrap();
		assert_eq!(parsed.ihdr.bit_depth, 16);
		assert_eq!(parsed.raw_idat().unwrap(), filtered);
	}
}
