/*!
# Mafli: PNG Color Models.

One scan over the decoded pixels collects everything the reducer needs
(distinct colors up to 257, grayness, alpha usage, color-key viability),
and the chooser proposes the narrowest model that actually pays for itself.
Palette orderings get their own search space: five priorities, two
directions, three transparency placements, four orderings.
*/

use std::collections::HashMap;
use crate::png::chunks::Ihdr;



/// # Palette Sort Permutation Count.
pub(crate) const PALETTE_SORTS: u8 = 120;



#[derive(Debug, Clone)]
/// # A Chosen Color Model.
pub(crate) enum ColorMode {
	/// # Truecolor + Alpha.
	Rgba,

	/// # Truecolor, Optionally Keyed.
	Rgb {
		/// # Fully-Transparent Stand-In Color.
		key: Option<[u8; 3]>,
	},

	/// # Grayscale, Optionally Keyed.
	Gray {
		/// # Fully-Transparent Stand-In Level.
		key: Option<u8>,
	},

	/// # Grayscale + Alpha.
	GrayAlpha,

	/// # Indexed.
	Palette {
		/// # Palette Entries (RGBA).
		palette: Vec<[u8; 4]>,

		/// # Index Bit Depth.
		depth: u8,
	},
}

impl ColorMode {
	/// # Bits Per Pixel.
	pub(crate) fn bpp_bits(&self) -> u32 {
		match self {
			Self::Rgba => 32,
			Self::Rgb { .. } => 24,
			Self::Gray { .. } => 8,
			Self::GrayAlpha => 16,
			Self::Palette { depth, .. } => u32::from(*depth),
		}
	}

	/// # Matching IHDR Fields: (color_type, bit_depth).
	pub(crate) fn ihdr_fields(&self) -> (u8, u8) {
		match self {
			Self::Rgba => (6, 8),
			Self::Rgb { .. } => (2, 8),
			Self::Gray { .. } => (0, 8),
			Self::GrayAlpha => (4, 8),
			Self::Palette { depth, .. } => (3, *depth),
		}
	}

	/// # PLTE Chunk Data, If Any.
	pub(crate) fn plte(&self) -> Option<Vec<u8>> {
		if let Self::Palette { palette, .. } = self {
			let mut out = Vec::with_capacity(palette.len() * 3);
			for c in palette { out.extend_from_slice(&c[..3]); }
			Some(out)
		}
		else { None }
	}

	/// # tRNS Chunk Data, If Any.
	pub(crate) fn trns(&self) -> Option<Vec<u8>> {
		match self {
			Self::Gray { key: Some(k) } => Some(vec![0, *k]),
			Self::Rgb { key: Some(k) } => Some(vec![0, k[0], 0, k[1], 0, k[2]]),
			Self::Palette { palette, .. } => {
				// Alpha bytes, trimmed of the trailing opaque run.
				let mut out: Vec<u8> = palette.iter().map(|c| c[3]).collect();
				while out.last() == Some(&255) { out.pop(); }
				if out.is_empty() { None } else { Some(out) }
			},
			_ => None,
		}
	}

	/// # Build the IHDR for This Mode.
	pub(crate) fn ihdr(&self, width: u32, height: u32) -> Ihdr {
		let (color_type, bit_depth) = self.ihdr_fields();
		Ihdr { width, height, bit_depth, color_type, interlace: 0 }
	}
}



#[derive(Debug)]
/// # Color Statistics.
pub(crate) struct ColorStats {
	/// # Any Non-Gray Pixels?
	pub(crate) colored: bool,

	/// # Any Transparency At All?
	pub(crate) has_alpha: bool,

	/// # Any Partial Transparency?
	pub(crate) semi_alpha: bool,

	/// # The Viable Color Key, If Any.
	///
	/// Set when exactly one RGB triple is ever fully transparent, and that
	/// triple never appears opaque.
	pub(crate) key: Option<[u8; 3]>,

	/// # Distinct Colors (When 256 or Fewer).
	pub(crate) palette: Option<Vec<[u8; 4]>>,
}

impl ColorStats {
	/// # Scan an RGBA-8 Buffer.
	pub(crate) fn scan(rgba: &[u8]) -> Self {
		let mut colored = false;
		let mut has_alpha = false;
		let mut semi_alpha = false;

		// Distinct colors, capped at 257 so we can tell "many" from "256".
		let mut seen: HashMap<[u8; 4], u32> = HashMap::with_capacity(257);
		let mut transparent: Option<[u8; 3]> = None;
		let mut multi_transparent = false;

		for px in rgba.chunks_exact(4) {
			let c = [px[0], px[1], px[2], px[3]];
			if c[3] != 255 {
				has_alpha = true;
				if c[3] != 0 { semi_alpha = true; }
				else {
					let rgb = [c[0], c[1], c[2]];
					match transparent {
						None => { transparent = Some(rgb); },
						Some(t) if t != rgb => { multi_transparent = true; },
						_ => {},
					}
				}
			}
			if c[0] != c[1] || c[1] != c[2] { colored = true; }

			if seen.len() <= 256 {
				*seen.entry(c).or_insert(0) += 1;
			}
		}

		// A key only works when the transparent color never shows up
		// opaque.
		let key =
			if semi_alpha || multi_transparent { None }
			else {
				transparent.filter(|t|
					! seen.contains_key(&[t[0], t[1], t[2], 255])
				)
			};

		let palette =
			if seen.len() <= 256 {
				// Popularity-descending gives a stable, deterministic base
				// ordering.
				let mut entries: Vec<([u8; 4], u32)> = seen.into_iter().collect();
				entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
				Some(entries.into_iter().map(|(c, _)| c).collect())
			}
			else { None };

		Self { colored, has_alpha, semi_alpha, key, palette }
	}

	/// # The Narrowest Unindexed Mode.
	///
	/// What the pixels would cost without a palette: truecolor or gray,
	/// with alpha as a channel or a key, as the scan demands.
	pub(crate) fn wide(&self) -> ColorMode {
		if self.colored {
			if self.semi_alpha { ColorMode::Rgba }
			else if self.has_alpha && self.key.is_some() {
				ColorMode::Rgb { key: self.key }
			}
			else if self.has_alpha { ColorMode::Rgba }
			else { ColorMode::Rgb { key: None } }
		}
		else if self.semi_alpha { ColorMode::GrayAlpha }
		else if self.has_alpha {
			match self.key {
				Some(k) => ColorMode::Gray { key: Some(k[0]) },
				None => ColorMode::GrayAlpha,
			}
		}
		else { ColorMode::Gray { key: None } }
	}

	/// # Choose the Narrowest Worthwhile Mode.
	///
	/// The wide mode is compared against the indexed rendition: the palette
	/// only wins when its storage overhead (eight bytes of chunk framing
	/// plus four per entry) is smaller than the pixel savings.
	pub(crate) fn choose(&self, n_pixels: usize) -> ColorMode {
		let fallback = self.wide();

		if let Some(palette) = &self.palette {
			let depth = palette_depth(palette.len());
			let savings = (n_pixels as u64)
				.saturating_mul(u64::from(fallback.bpp_bits()) - u64::from(depth))
				.wrapping_div(8);
			let overhead = 8 + 4 * palette.len() as u64;
			if u32::from(depth) < fallback.bpp_bits() && overhead < savings {
				return ColorMode::Palette { palette: palette.clone(), depth };
			}
		}

		fallback
	}
}

/// # Smallest Legal Index Depth.
pub(crate) fn palette_depth(n: usize) -> u8 {
	if n <= 2 { 1 }
	else if n <= 4 { 2 }
	else if n <= 16 { 4 }
	else { 8 }
}



/// # Re-Order a Palette.
///
/// `strategy` indexes the 120-permutation space: priority (5) × direction
/// (2) × transparency placement (3) × ordering (4). The pixel data feeds
/// the popularity and adjacency measures.
pub(crate) fn sort_palette(
	palette: &mut [[u8; 4]],
	rgba: &[u8],
	width: usize,
	height: usize,
	strategy: u8,
) {
	let count = palette.len();
	if count < 2 { return; }

	let priority = strategy % 5;
	let direction = (strategy / 5) % 2;
	let transparency = (strategy / 10) % 3;
	let order = (strategy / 30) % 4;

	// Popularity per palette entry.
	let mut popularity: HashMap<[u8; 4], u64> = HashMap::with_capacity(count);
	for px in rgba.chunks_exact(4) {
		*popularity.entry([px[0], px[1], px[2], px[3]]).or_insert(0) += 1;
	}

	// Sort fields: bits 0-7 original index, 8-39 encoding/popularity,
	// 40-47 order score, 63 transparency flag.
	let mut fields: Vec<u64> = (0..count as u64).collect();
	for (i, c) in palette.iter().enumerate() {
		let r = u64::from(c[0]);
		let g = u64::from(c[1]);
		let b = u64::from(c[2]);
		fields[i] |= match priority {
			// Popularity.
			0 => (popularity.get(c).copied().unwrap_or(0) + 1) << 8,
			// Plain RGB.
			1 => r << 32 | g << 24 | b << 16,
			// YUV.
			2 => {
				let rf = r as f64;
				let gf = g as f64;
				let bf = b as f64;
				let y = 0.299 * rf + 0.587 * gf + 0.114 * bf;
				let u = (-0.147_13 * rf - 0.288_86 * gf + 0.436 * bf + 111.18) / 0.872;
				let v = (0.615 * rf - 0.514_99 * gf - 0.100_01 * bf + 156.825) / 1.23;
				(y as u64) << 32 | (u as u64) << 24 | (v as u64) << 16
			},
			// Lab.
			3 => {
				let (l, a2, b2) = rgb_to_lab(c[0], c[1], c[2]);
				(l as u64) << 32 | (a2 as u64) << 24 | (b2 as u64) << 16
			},
			// MSB bit-plane interleave.
			_ => {
				let mut acc = 0_u64;
				for bit in 0..8_u64 {
					let mask = 128 >> bit;
					let shift = 39 - bit * 3;
					acc |= u64::from(c[0] & mask != 0) << shift
						| u64::from(c[1] & mask != 0) << (shift - 1)
						| u64::from(c[2] & mask != 0) << (shift - 2);
				}
				acc
			},
		};
	}

	// Transparency placement.
	match transparency {
		// Opaque entries to the back.
		1 => {
			for (i, c) in palette.iter().enumerate() {
				if c[3] == 0xFF { fields[i] |= 1 << 63; }
			}
			mix_alpha(&mut fields, palette, priority);
		},
		// Alpha participates in the sort key.
		2 => mix_alpha(&mut fields, palette, priority),
		// Ignored.
		_ => {},
	}

	const VALUE_MASK: u64 = 0x7FFF_FFFF_FFFF_FF00;

	if order == 0 {
		// Global sort; descending just flips the comparable bits.
		if direction == 1 {
			for f in &mut fields {
				*f = (! *f & VALUE_MASK) | (*f & ! VALUE_MASK);
			}
		}
	}
	else {
		// Chained orderings start from the extreme entry and greedily walk
		// to the nearest remaining neighbor, by color distance (optionally
		// popularity- or adjacency-weighted).
		let mut best = 0_usize;
		let mut value = if direction == 1 { 0_u64 } else { u64::MAX };
		for (i, f) in fields.iter().enumerate().skip(1) {
			let v = f & !(1 << 63);
			if (direction == 1 && v > value) || (direction == 0 && v < value) {
				value = v;
				best = i;
			}
		}

		// Index adjacency counts, for the neighbor ordering.
		let neighbors =
			if order == 3 { count_neighbors(palette, rgba, width, height) }
			else { HashMap::new() };

		for i in 0..count - 1 {
			fields.swap(i, best);
			fields[i] |= (i as u64) << 40;
			let cur = palette[(fields[i] & 0xFF) as usize];

			let mut bestdist = f64::INFINITY;
			best = i + 1;
			for j in i + 1..count {
				let cand = palette[(fields[j] & 0xFF) as usize];
				let mut dist = f64::from(
					(i32::from(cur[0]) - i32::from(cand[0])).pow(2)
					+ (i32::from(cur[1]) - i32::from(cand[1])).pow(2)
					+ (i32::from(cur[2]) - i32::from(cand[2])).pow(2)
				);
				if transparency == 2 {
					dist += f64::from((i32::from(cur[3]) - i32::from(cand[3])).pow(2));
				}

				match order {
					// Nearest color.
					1 => {},
					// Weighted by popularity.
					2 => {
						dist /= popularity.get(&cand).copied().unwrap_or(0) as f64 + 1.0;
					},
					// Weighted by 2D adjacency.
					_ => {
						let a = (fields[i] & 0xFF) as u8;
						let b = (fields[j] & 0xFF) as u8;
						let n = neighbors.get(&pair_key(a, b)).copied().unwrap_or(0);
						dist /= f64::from(n) + 1.0;
						if dist == 0.0 { continue; }
					},
				}

				if dist < bestdist {
					bestdist = dist;
					best = j;
				}
			}
		}
		fields[count - 1] |= ((count - 1) as u64) << 40;
	}

	fields.sort_unstable();
	let old: Vec<[u8; 4]> = palette.to_vec();
	for (dst, f) in palette.iter_mut().zip(fields) {
		*dst = old[(f & 0xFF) as usize];
	}
}

/// # Fold Alpha Into the Sort Value.
fn mix_alpha(fields: &mut [u64], palette: &[[u8; 4]], priority: u8) {
	if priority == 4 {
		// The bit-plane priority interleaves alpha bits too.
		for (f, c) in fields.iter_mut().zip(palette) {
			let a = u64::from(c[3]);
			*f |= (a & 0x80) << 36 | (a & 0x40) << 32
				| (a & 0x20) << 28 | (a & 0x10) << 24 | (a & 8) << 20
				| (a & 4) << 16 | (a & 2) << 12 | (a & 1) << 8;
		}
	}
	else if priority != 0 {
		for (f, c) in fields.iter_mut().zip(palette) {
			*f |= u64::from(c[3]) << 8;
		}
	}
}

/// # Symmetric Index-Pair Key.
const fn pair_key(a: u8, b: u8) -> u16 {
	if a < b { (a as u16) << 8 | b as u16 }
	else { (b as u16) << 8 | a as u16 }
}

/// # Count Which Palette Indices Border Each Other.
///
/// A 2D scan over the image tallying 4-neighborhood adjacency between
/// palette entries; chains that follow high-adjacency pairs tend to filter
/// better.
fn count_neighbors(
	palette: &[[u8; 4]],
	rgba: &[u8],
	width: usize,
	height: usize,
) -> HashMap<u16, u32> {
	let mut lookup: HashMap<[u8; 4], u8> = HashMap::with_capacity(palette.len());
	for (i, c) in palette.iter().enumerate() { lookup.entry(*c).or_insert(i as u8); }

	let at = |x: usize, y: usize| -> u8 {
		let p = (y * width + x) * 4;
		lookup.get(&[rgba[p], rgba[p + 1], rgba[p + 2], rgba[p + 3]])
			.copied()
			.unwrap_or(0)
	};

	let mut out: HashMap<u16, u32> = HashMap::new();
	for y in 0..height {
		for x in 0..width {
			let me = at(x, y);
			if x + 1 < width {
				*out.entry(pair_key(me, at(x + 1, y))).or_insert(0) += 1;
			}
			if y + 1 < height {
				*out.entry(pair_key(me, at(x, y + 1))).or_insert(0) += 1;
			}
		}
	}
	out
}

/// # RGB to (Scaled) Lab.
fn rgb_to_lab(r: u8, g: u8, b: u8) -> (u16, u16, u16) {
	let rf = f64::from(r);
	let gf = f64::from(g);
	let bf = f64::from(b);

	let mut vx = (0.412_456_4 * rf + 0.357_576_1 * gf + 0.180_437_5 * bf) / 255.0 / 95.047;
	let mut vy = (0.212_672_9 * rf + 0.715_152_2 * gf + 0.072_175 * bf) / 255.0 / 100.0;
	let mut vz = (0.019_333_9 * rf + 0.119_192 * gf + 0.950_304_1 * bf) / 255.0 / 108.883;

	const EP: f64 = 216.0 / 24_389.0;
	const KA: f64 = 24_389.0 / 27.0;
	const DE: f64 = 4.0 / 29.0;

	vx = if vx > EP { vx.cbrt() } else { KA * vx + DE };
	vy = if vy > EP { vy.cbrt() } else { KA * vy + DE };
	vz = if vz > EP { vz.cbrt() } else { KA * vz + DE };

	(
		((vy * 116.0 - 16.0) / 100.0 * 255.0).clamp(0.0, 65_535.0) as u16,
		((vx - vy) * 500.0 + 256.0).clamp(0.0, 65_535.0) as u16,
		((vy - vz) * 200.0 + 256.0).clamp(0.0, 65_535.0) as u16,
	)
}



#[cfg(test)]
mod tests {
	use super::*;

	/// # Build an RGBA Buffer From (Color, Count) Pairs.
	fn rgba_of(pairs: &[([u8; 4], usize)]) -> Vec<u8> {
		let mut out = Vec::new();
		for (c, n) in pairs {
			for _ in 0..*n { out.extend_from_slice(c); }
		}
		out
	}

	#[test]
	fn t_stats_gray() {
		let rgba = rgba_of(&[([7, 7, 7, 255], 50), ([200, 200, 200, 255], 50)]);
		let stats = ColorStats::scan(&rgba);
		assert!(! stats.colored);
		assert!(! stats.has_alpha);
		assert_eq!(stats.palette.as_ref().map(Vec::len), Some(2));
	}

	#[test]
	fn t_stats_key() {
		// One unique fully-transparent color, never opaque: keyable.
		let rgba = rgba_of(&[([1, 2, 3, 0], 10), ([9, 9, 9, 255], 90)]);
		let stats = ColorStats::scan(&rgba);
		assert_eq!(stats.key, Some([1, 2, 3]));

		// The same color also appearing opaque kills the key.
		let rgba = rgba_of(&[([1, 2, 3, 0], 10), ([1, 2, 3, 255], 90)]);
		let stats = ColorStats::scan(&rgba);
		assert!(stats.key.is_none());

		// Partial alpha kills it too.
		let rgba = rgba_of(&[([1, 2, 3, 0], 10), ([9, 9, 9, 128], 90)]);
		let stats = ColorStats::scan(&rgba);
		assert!(stats.key.is_none());
	}

	#[test]
	fn t_choose_palette() {
		// A 16×16 image with four opaque colors: palette at two bits.
		let rgba = rgba_of(&[
			([255, 0, 0, 255], 64),
			([0, 255, 0, 255], 64),
			([0, 0, 255, 255], 64),
			([0, 0, 0, 255], 64),
		]);
		let stats = ColorStats::scan(&rgba);
		match stats.choose(256) {
			ColorMode::Palette { palette, depth } => {
				assert_eq!(palette.len(), 4);
				assert_eq!(depth, 2);
			},
			other => panic!("expected a palette, got {other:?}"),
		}
	}

	#[test]
	fn t_choose_tiny_stays_wide() {
		// Four pixels can't pay for a palette.
		let rgba = rgba_of(&[
			([255, 0, 0, 255], 1),
			([0, 255, 0, 255], 1),
			([0, 0, 255, 255], 1),
			([0, 0, 0, 255], 1),
		]);
		let stats = ColorStats::scan(&rgba);
		assert!(matches!(stats.choose(4), ColorMode::Rgb { key: None }));
	}

	#[test]
	fn t_palette_depths() {
		assert_eq!(palette_depth(2), 1);
		assert_eq!(palette_depth(3), 2);
		assert_eq!(palette_depth(4), 2);
		assert_eq!(palette_depth(5), 4);
		assert_eq!(palette_depth(17), 8);
		assert_eq!(palette_depth(256), 8);
	}

	#[test]
	fn t_sort_preserves_entries() {
		// Every strategy is a permutation: same entries, maybe new order.
		let rgba = rgba_of(&[
			([10, 20, 30, 255], 5),
			([200, 100, 50, 255], 20),
			([0, 0, 0, 0], 3),
			([90, 90, 90, 255], 12),
		]);
		let base = vec![
			[10, 20, 30, 255],
			[200, 100, 50, 255],
			[0, 0, 0, 0],
			[90, 90, 90, 255],
		];

		for strategy in 0..PALETTE_SORTS {
			let mut p = base.clone();
			sort_palette(&mut p, &rgba, 8, 5, strategy);
			let mut a = p.clone();
			let mut b = base.clone();
			a.sort_unstable();
			b.sort_unstable();
			assert_eq!(a, b, "strategy {strategy} lost an entry");
		}
	}

	#[test]
	fn t_trns_trimming() {
		// Opaque tails drop off the tRNS data.
		let mode = ColorMode::Palette {
			palette: vec![[0, 0, 0, 0], [5, 5, 5, 255], [6, 6, 6, 255]],
			depth: 2,
		};
		assert_eq!(mode.trns(), Some(vec![0]));

		// All-opaque palettes need no tRNS at all.
		let mode = ColorMode::Palette {
			palette: vec![[5, 5, 5, 255], [6, 6, 6, 255]],
			depth: 1,
		};
		assert_eq!(mode.trns(), None);
	}
}
