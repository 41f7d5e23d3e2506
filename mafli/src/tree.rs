/*!
# Mafli: Dynamic Tree Headers.

Everything about RFC 1951 §3.2.7: serializing the (ll, d) code lengths with
the run-length alphabet, searching the encoding variants for the smallest
header, massaging symbol counts so the RLE part compresses better, and the
combined tree+data size estimates the block splitter leans on.
*/

use dactyl::NoHash;
use std::{
	cell::RefCell,
	collections::{
		hash_map::Entry,
		HashMap,
	},
};
use crate::{
	deflate::BitWriter,
	error::{
		mafli_error,
		MafliError,
	},
	katajainen::{
		canonical_symbols,
		length_limited_code_lengths,
	},
	symbols::{
		ArrayD,
		ArrayLL,
		DISTANCE_BITS,
		LENGTH_EXTRA_BITS,
	},
};



/// # Code-Length-Code Write Order.
const TREE_PERMUTATION: [usize; 19] = [
	16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// # Variant Bits.
///
/// Encoding variants are a bitfield: rep16/rep17/rep18 usage plus the two
/// run-fusing toggles. Cheap modes search the first eight; advanced modes
/// search all thirty-two.
const VARIANT_USE_16: u8 = 0b0_0001;

/// # Variant Bit: Use Rep-17.
const VARIANT_USE_17: u8 = 0b0_0010;

/// # Variant Bit: Use Rep-18.
const VARIANT_USE_18: u8 = 0b0_0100;

/// # Variant Bit: Fuse Runs of Eight.
const VARIANT_FUSE_8: u8 = 0b0_1000;

/// # Variant Bit: Fuse Runs of Seven.
const VARIANT_FUSE_7: u8 = 0b1_0000;

/// # Memoized Dynamic-Lengths Result.
#[derive(Clone, Copy)]
struct CachedLengths {
	/// # Winning Variant.
	extra: u8,

	/// # Tree + Data Bits.
	size: u32,

	/// # Litlen Code Lengths.
	ll_lengths: ArrayLL<u8>,

	/// # Distance Code Lengths.
	d_lengths: ArrayD<u8>,
}

type LengthsCache = HashMap<u64, CachedLengths, NoHash>;

thread_local!(
	/// # Dynamic Lengths Cache.
	///
	/// The dynamic length calculations are expensive and get repeated many
	/// times for a given block during splitting. The results are memoized
	/// per thread and cleared for each new file to keep lookups quick.
	static CACHE: RefCell<LengthsCache> = RefCell::new(HashMap::default())
);

/// # Reset the Dynamic Lengths Cache.
pub(crate) fn reset_lengths_cache() { CACHE.with_borrow_mut(HashMap::clear); }



/// # Best Dynamic Code Lengths for a Histogram.
///
/// Builds length-limited codes from the counts as-is and from one or more
/// RLE-friendlier reshapings, sizes each (tree header + symbol data), and
/// returns the smallest: `(variant, total_bits, ll_lengths, d_lengths)`.
///
/// The returned size excludes the 3-bit block header.
pub(crate) fn get_dynamic_lengths(
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
	advanced: bool,
) -> Result<(u8, u32, ArrayLL<u8>, ArrayD<u8>), MafliError> {
	// Check the memo first.
	let key = hash_counts(ll_counts, d_counts, advanced);
	if let Some(hit) = CACHE.with_borrow(|cache| cache.get(&key).copied()) {
		return Ok((hit.extra, hit.size, hit.ll_lengths, hit.d_lengths));
	}

	let mut best: Option<CachedLengths> = None;

	// Candidate one: the counts as they are.
	let mut winner = 0_u8;
	if try_candidate(ll_counts, d_counts, ll_counts, d_counts, 15, advanced, &mut best)? {
		winner = 0;
	}

	// Candidate two: counts reshaped for better RLE headers.
	let mut ll2 = *ll_counts;
	let mut d2 = *d_counts;
	optimize_for_rle(&mut ll2);
	optimize_for_rle(&mut d2);
	if try_candidate(ll_counts, d_counts, &ll2, &d2, 15, advanced, &mut best)? {
		winner = 1;
	}

	if advanced {
		// Candidate three: the alternate (streak-averaging) reshaping.
		let mut ll3 = *ll_counts;
		let mut d3 = *d_counts;
		optimize_for_rle_brotli(&mut ll3);
		optimize_for_rle_brotli(&mut d3);
		if try_candidate(ll_counts, d_counts, &ll3, &d3, 15, advanced, &mut best)? {
			winner = 2;
		}

		// Candidate four: keep the winning shape but sweep the bit ceiling
		// downward until it stops helping for two steps running.
		let (sweep_ll, sweep_d) = match winner {
			0 => (ll_counts, d_counts),
			1 => (&ll2, &d2),
			_ => (&ll3, &d3),
		};
		let mut misses = 0_u8;
		let mut maxbits = 15;
		while maxbits > 9 && misses < 2 {
			maxbits -= 1;
			if try_candidate(ll_counts, d_counts, sweep_ll, sweep_d, maxbits, advanced, &mut best)? {
				misses = 0;
			}
			else { misses += 1; }
		}
	}

	let best = best.ok_or(mafli_error!())?;
	CACHE.with_borrow_mut(|cache| {
		if let Entry::Vacant(e) = cache.entry(key) { e.insert(best); }
	});
	Ok((best.extra, best.size, best.ll_lengths, best.d_lengths))
}

/// # Evaluate One Candidate Count Shape.
///
/// Codes are derived from the (possibly reshaped) `try_*` counts, but the
/// data size is always measured against the *original* counts. Updates
/// `best` and reports whether it improved.
fn try_candidate(
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
	try_ll: &ArrayLL<u32>,
	try_d: &ArrayD<u32>,
	maxbits: usize,
	advanced: bool,
	best: &mut Option<CachedLengths>,
) -> Result<bool, MafliError> {
	let ll_lengths = length_limited_code_lengths(try_ll, maxbits)?;
	let d_lengths = patched_d_lengths(try_d, maxbits)?;

	let (extra, treesize) = best_tree_size(&ll_lengths, &d_lengths, advanced)?;
	let size = treesize + symbol_data_size(ll_counts, d_counts, &ll_lengths, &d_lengths);

	if best.as_ref().is_none_or(|b| size < b.size) {
		*best = Some(CachedLengths { extra, size, ll_lengths, d_lengths });
		Ok(true)
	}
	else { Ok(false) }
}

/// # Distance Code Lengths, Patched.
///
/// Some old inflate implementations choke when fewer than two distance
/// codes exist, so phantom length-1 codes are added as needed.
pub(crate) fn patched_d_lengths(d_counts: &ArrayD<u32>, maxbits: usize)
-> Result<ArrayD<u8>, MafliError> {
	let mut d_lengths = length_limited_code_lengths(d_counts, maxbits)?;

	let mut one: Option<bool> = None;
	for (i, dist) in d_lengths.iter().copied().enumerate().take(30) {
		// Two non-zero entries; no patching needed.
		if dist != 0 && one.replace(i == 0).is_some() { return Ok(d_lengths); }
	}

	match one {
		// The first entry had a code, so patching the second gives us two.
		Some(true) => { d_lengths[1] = 1; },
		// The first entry didn't have a code, so patching it gives us two.
		Some(false) => { d_lengths[0] = 1; },
		// There were no codes at all; patch the first two.
		None => {
			d_lengths[0] = 1;
			d_lengths[1] = 1;
		},
	}

	Ok(d_lengths)
}

/// # Symbol Data Size (in Bits).
///
/// The cost of the block body: all coded symbols plus their extra bits,
/// including the end-of-block code (provided `ll_counts[256]` is set).
pub(crate) fn symbol_data_size(
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
	ll_lengths: &ArrayLL<u8>,
	d_lengths: &ArrayD<u8>,
) -> u32 {
	let mut size = 0;
	for i in 0..286 {
		size += u32::from(ll_lengths[i]) * ll_counts[i];
	}
	for (i, bits) in LENGTH_EXTRA_BITS.iter().copied().enumerate() {
		size += bits * ll_counts[257 + i];
	}
	for i in 0..30 {
		size += (u32::from(d_lengths[i]) + u32::from(DISTANCE_BITS[i])) * d_counts[i];
	}
	size
}

/// # Shannon Estimate of Code Lengths.
///
/// An approximation used under `entropysplit`: the "length" of each symbol
/// is its self-information, truncated and capped at fifteen.
fn entropy_lengths<const N: usize>(counts: &[u32; N]) -> ([u8; N], f64) {
	let mut lengths = [0_u8; N];
	let sum = counts.iter().copied().map(u64::from).sum::<u64>();
	if sum == 0 { return (lengths, 0.0); }
	let log2sum = (sum as f64).log2();

	let mut result = 0.0;
	for (c, l) in counts.iter().copied().zip(&mut lengths) {
		// Zero-count symbols cost as if they appeared once.
		let mut val =
			if c == 0 { log2sum }
			else { log2sum - f64::from(c).log2() };
		if val > 15.0 { val = 15.0; }
		if val < 0.0 { val = 0.0; }
		*l = val as u8;
		result += val * f64::from(c);
	}

	(lengths, result)
}

/// # Entropy-Approximated Block Size.
///
/// The cheap stand-in for `get_dynamic_lengths` used by the block splitter
/// in entropy mode: Shannon symbol costs plus extra bits plus a real tree
/// header sized over the approximate lengths.
pub(crate) fn entropy_block_size(
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
) -> Result<u32, MafliError> {
	let (ll_lengths, ll_bits) = entropy_lengths(ll_counts);
	let (mut d_lengths, d_bits) = entropy_lengths(d_counts);
	for l in &mut d_lengths[30..] { *l = 0; }

	let mut size = ll_bits + d_bits;
	for (i, bits) in LENGTH_EXTRA_BITS.iter().copied().enumerate() {
		size += f64::from(bits * ll_counts[257 + i]);
	}
	for i in 0..30 {
		size += f64::from(u32::from(DISTANCE_BITS[i]) * d_counts[i]);
	}

	let (_, treesize) = best_tree_size(&ll_lengths, &d_lengths, false)?;
	Ok(size as u32 + treesize)
}



/// # Calculate the Exact Tree Size (in Bits).
///
/// Sizes every encoding variant and returns the winner along with its size.
pub(crate) fn best_tree_size(
	ll_lengths: &ArrayLL<u8>,
	d_lengths: &ArrayD<u8>,
	advanced: bool,
) -> Result<(u8, u32), MafliError> {
	let (all, _, _) = tree_symbols(ll_lengths, d_lengths);

	let mut best_extra = 0;
	let mut best_size = u32::MAX;

	let variants: u8 = if advanced { 32 } else { 8 };
	for extra in 0..variants {
		// The fuse bits do nothing without rep-16.
		if extra & (VARIANT_FUSE_8 | VARIANT_FUSE_7) != 0 && extra & VARIANT_USE_16 == 0 {
			continue;
		}

		let cl_counts = rle_symbols(&all, extra, None);
		let cl_lengths = length_limited_code_lengths(&cl_counts, 7)?;
		let hclen = tree_hclen(&cl_lengths);

		let mut size = 14; // HLIT + HDIST + HCLEN.
		size += (hclen as u32 + 4) * 3;
		size += cl_lengths.iter()
			.copied()
			.zip(cl_counts.iter().copied())
			.map(|(a, b)| u32::from(a) * b)
			.sum::<u32>();
		size += cl_counts[16] * 2; // Extra bits.
		size += cl_counts[17] * 3;
		size += cl_counts[18] * 7;

		if size < best_size {
			best_extra = extra;
			best_size = size;
		}
	}

	Ok((best_extra, best_size))
}

/// # Encode the Tree.
///
/// Writes the dynamic header for the given variant to `out`.
pub(crate) fn encode_tree(
	ll_lengths: &ArrayLL<u8>,
	d_lengths: &ArrayD<u8>,
	extra: u8,
	out: &mut BitWriter,
) -> Result<(), MafliError> {
	let (all, hlit, hdist) = tree_symbols(ll_lengths, d_lengths);

	let mut rle: Vec<(u8, u16)> = Vec::new();
	let cl_counts = rle_symbols(&all, extra, Some(&mut rle));
	let cl_lengths = length_limited_code_lengths(&cl_counts, 7)?;
	let hclen = tree_hclen(&cl_lengths);
	let cl_symbols = canonical_symbols(&cl_lengths);

	out.add_bits(hlit as u32, 5);
	out.add_bits(hdist as u32, 5);
	out.add_bits(hclen as u32, 4);

	// Each code-length-code length, in the jumbled write order.
	for &o in &TREE_PERMUTATION[..hclen as usize + 4] {
		out.add_bits(u32::from(cl_lengths[o]), 3);
	}

	// Each symbol in order of appearance, with its extra bits, if any.
	for (a, b) in rle {
		if cl_lengths[usize::from(a)] == 0 { return Err(mafli_error!()); }
		out.add_huffman_bits(cl_symbols[usize::from(a)], u32::from(cl_lengths[usize::from(a)]));
		match a {
			16 => { out.add_bits(u32::from(b), 2); },
			17 => { out.add_bits(u32::from(b), 3); },
			18 => { out.add_bits(u32::from(b), 7); },
			_ => {},
		}
	}

	Ok(())
}

/// # Merge and Trim the Length Sets.
///
/// Drops the two-symbol tails, trims trailing zeroes down to the HLIT/HDIST
/// minima, and glues lengths-then-distances into one slice for the RLE
/// walk. Returns `(merged, hlit, hdist)`.
fn tree_symbols(ll_lengths: &ArrayLL<u8>, d_lengths: &ArrayD<u8>)
-> (Vec<u8>, u8, u8) {
	// 256 always has a code, so the search can't come up empty.
	let hlit = ll_lengths[257..286].iter()
		.rposition(|&b| b != 0)
		.map_or(0, |v| v + 1) as u8;
	let hdist = d_lengths[..30].iter()
		.rposition(|&b| b != 0)
		.unwrap_or(0) as u8;

	let ll_len = 257 + usize::from(hlit);
	let d_len = 1 + usize::from(hdist);

	let mut all = Vec::with_capacity(ll_len + d_len);
	all.extend_from_slice(&ll_lengths[..ll_len]);
	all.extend_from_slice(&d_lengths[..d_len]);

	(all, hlit, hdist)
}

/// # Last Meaningful Code-Length Code.
///
/// Returns HCLEN: how many entries (minus four) of the permuted length list
/// must be written.
fn tree_hclen(cl_lengths: &[u8; 19]) -> u8 {
	let mut hclen = 15_usize;
	while hclen > 0 && cl_lengths[TREE_PERMUTATION[hclen + 3]] == 0 {
		hclen -= 1;
	}
	hclen as u8
}

/// # Run-Length Encode the Symbol List.
///
/// Walks the merged lengths, forming runs per the variant toggles, tallying
/// code-length-code counts. When `rle` is provided, the emitted
/// `(symbol, extra_value)` sequence is recorded for writing.
fn rle_symbols(all: &[u8], extra: u8, mut rle: Option<&mut Vec<(u8, u16)>>) -> [u32; 19] {
	let use16 = extra & VARIANT_USE_16 != 0;
	let use17 = extra & VARIANT_USE_17 != 0;
	let use18 = extra & VARIANT_USE_18 != 0;
	let fuse8 = extra & VARIANT_FUSE_8 != 0;
	let fuse7 = extra & VARIANT_FUSE_7 != 0;

	let mut cl_counts = [0_u32; 19];

	/// # Helper: Tally (and Maybe Record) One Emission.
	macro_rules! emit {
		($sym:expr, $val:expr) => (
			cl_counts[$sym as usize] += 1;
			if let Some(r) = rle.as_mut() { r.push(($sym, $val)); }
		);
	}

	let mut i = 0;
	while i < all.len() {
		let symbol = all[i];
		let mut count: u16 = 1;

		// Peek ahead when a run could pay off.
		if use16 || ((use17 || use18) && symbol == 0) {
			let mut j = i + 1;
			while j < all.len() && all[j] == symbol {
				count += 1;
				j += 1;
				i += 1;
			}

			// Runs of zeroes get the dedicated codes.
			if symbol == 0 {
				if use18 {
					while count >= 11 {
						let c2 = count.min(138);
						emit!(18_u8, c2 - 11);
						count -= c2;
					}
				}
				if use17 {
					while count >= 3 {
						let c2 = count.min(10);
						emit!(17_u8, c2 - 3);
						count -= c2;
					}
				}
			}

			// Everything else repeats through rep-16, seeded by one literal.
			if use16 && count >= 4 {
				count -= 1;
				emit!(symbol, 0_u16);

				if fuse8 && symbol != 0 && count == 8 {
					// Two mid-size repeats beat a long one plus stragglers
					// when the symbol's own code is long.
					emit!(16_u8, 1_u16);
					emit!(16_u8, 1_u16);
					count = 0;
				}
				else if fuse7 && symbol != 0 && count == 7 {
					emit!(16_u8, 1_u16);
					emit!(16_u8, 0_u16);
					count = 0;
				}
				else {
					while count >= 3 {
						let c2 = count.min(6);
						emit!(16_u8, c2 - 3);
						count -= c2;
					}
				}
			}
		}

		// Whatever remains goes out literally.
		cl_counts[usize::from(symbol)] += u32::from(count);
		if let Some(r) = rle.as_mut() {
			for _ in 0..count { r.push((symbol, 0)); }
		}
		i += 1;
	}

	cl_counts
}



/// # Optimize Counts for RLE (Classic).
///
/// Change the population counts to potentially improve the Huffman tree
/// compression, particularly the RLE part of the header. Strides of four or
/// more near-equal counts collapse to their rounded mean.
fn optimize_for_rle(counts: &mut [u32]) {
	// Trailing zeroes stay untouched.
	let mut length = counts.len();
	while length > 0 && counts[length - 1] == 0 { length -= 1; }
	if length == 0 { return; }
	let counts = &mut counts[..length];

	// Mark stretches already good for RLE: 5+ zeroes or 7+ equal non-zeroes.
	let mut good = vec![false; length];
	let mut symbol = counts[0];
	let mut stride = 0_usize;
	for i in 0..=length {
		if i == length || counts[i] != symbol {
			if (symbol == 0 && stride >= 5) || stride >= 7 {
				for g in &mut good[i - stride..i] { *g = true; }
			}
			stride = 1;
			if i != length { symbol = counts[i]; }
		}
		else { stride += 1; }
	}

	// Collapse the in-between strides.
	let mut stride = 0_u32;
	let mut scratch = counts[0];
	let mut sum = 0_u32;
	for i in 0..=length {
		let count = counts.get(i).copied().unwrap_or(0);
		if i == length || good[i] || count.abs_diff(scratch) >= 4 {
			if sum != 0 && stride >= 4 {
				let v = u32::max((sum + stride / 2) / stride, 1);
				for c in &mut counts[i - stride as usize..i] { *c = v; }
			}
			stride = 0;
			sum = 0;

			// A short weighted average of what's ahead makes a better
			// baseline than the single next count.
			scratch =
				if i + 4 <= length {
					(counts[i..i + 4].iter().sum::<u32>() + 2) / 4
				}
				else { count };
		}

		stride += 1;
		sum += count;
	}
}

/// # Optimize Counts for RLE (Streak-Averaging).
///
/// The alternate reshaping, working in 24.8 fixed point with a rolling
/// stride average; sometimes beats the classic heuristic, sometimes loses,
/// so the caller tries both.
fn optimize_for_rle_brotli(counts: &mut [u32]) {
	const STREAK_LIMIT: i64 = 1240;

	let mut length = counts.len();
	while length > 0 && counts[length - 1] == 0 { length -= 1; }
	if length == 0 { return; }
	let counts = &mut counts[..length];

	// Mark the already-good stretches, same rules as the classic variant.
	let mut good = vec![false; length];
	let mut symbol = counts[0];
	let mut stride = 0_usize;
	for i in 0..=length {
		if i == length || counts[i] != symbol {
			if (symbol == 0 && stride >= 5) || stride >= 7 {
				for g in &mut good[i - stride..i] { *g = true; }
			}
			stride = 1;
			if i != length { symbol = counts[i]; }
		}
		else { stride += 1; }
	}

	// Replace the counts that lead to more RLE codes. Math in 24.8 fixed
	// point.
	let mut stride = 0_u32;
	let mut limit: i64 =
		if length >= 3 {
			256 * i64::from(counts[0] + counts[1] + counts[2]) / 3 + 420
		}
		else { 256 * i64::from(counts[0]) };
	let mut sum = 0_u32;
	for i in 0..=length {
		let count = counts.get(i).copied().unwrap_or(0);
		if
			i == length ||
			good[i] ||
			(i != 0 && good[i - 1]) ||
			(256 * i64::from(count) - limit).abs() >= STREAK_LIMIT
		{
			if stride >= 4 {
				let v = u32::max((sum + stride / 2) / stride, u32::from(sum != 0));
				for c in &mut counts[i - stride as usize..i] { *c = v; }
			}
			stride = 0;
			sum = 0;
			limit =
				if i + 2 < length {
					256 * i64::from(counts[i] + counts[i + 1] + counts[i + 2]) / 3 + 420
				}
				else if i < length { 256 * i64::from(count) }
				else { 0 };
		}

		stride += 1;
		if i != length {
			sum += count;
			if stride >= 4 {
				limit = (256 * i64::from(sum) + i64::from(stride / 2)) / i64::from(stride);
			}
			if stride == 4 { limit += 120; }
		}
	}
}

/// # Hash Counts for the Memo Cache.
fn hash_counts(
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
	advanced: bool,
) -> u64 {
	use ahash::RandomState;
	use std::hash::{BuildHasher, Hash, Hasher};

	let mut h = RandomState::with_seeds(
		0x243f_6a88_85a3_08d3,
		0x1319_8a2e_0370_7344,
		0xa409_3822_299f_31d0,
		0x082e_fa98_ec4e_6c89,
	).build_hasher();

	ll_counts.hash(&mut h);
	d_counts.hash(&mut h);
	advanced.hash(&mut h);
	h.finish()
}



#[cfg(test)]
mod tests {
	use super::*;
	use crate::symbols::{
		NUM_D,
		NUM_LL,
	};

	/// # Simulated Header Size From an RLE Record.
	///
	/// Recomputes what `best_tree_size` reports, but from the write-path
	/// record, so the two stay honest with each other.
	fn size_from_rle(rle: &[(u8, u16)], cl_lengths: &[u8; 19], hclen: u8) -> u32 {
		let mut size = 14 + (u32::from(hclen) + 4) * 3;
		for &(sym, _) in rle {
			size += u32::from(cl_lengths[usize::from(sym)]);
			size += match sym { 16 => 2, 17 => 3, 18 => 7, _ => 0 };
		}
		size
	}

	/// # A Messy Set of Lengths.
	///
	/// The run shapes are picked to reach every encoding path: long zero
	/// runs, long non-zero runs, and the exact eight/seven-repeat runs the
	/// fuse variants rewrite.
	fn sample_lengths() -> (ArrayLL<u8>, ArrayD<u8>) {
		let mut ll = [0_u8; NUM_LL];
		for i in 0..144 { ll[i] = 8; }
		for i in 144..200 { ll[i] = 9; }
		ll[256] = 7;
		for i in 257..266 { ll[i] = 10; } // Nine: a literal plus eight repeats.
		let mut d = [0_u8; NUM_D];
		for i in 0..8 { d[i] = 5; } // Eight: a literal plus seven repeats.
		(ll, d)
	}

	#[test]
	fn t_tree_size_agrees_with_write() {
		let (ll, d) = sample_lengths();
		for advanced in [false, true] {
			let (extra, size) = best_tree_size(&ll, &d, advanced).unwrap();

			// Re-derive with the writer bookkeeping.
			let (all, _, _) = tree_symbols(&ll, &d);
			let mut rle = Vec::new();
			let cl_counts = rle_symbols(&all, extra, Some(&mut rle));
			let cl_lengths = length_limited_code_lengths(&cl_counts, 7).unwrap();
			let hclen = tree_hclen(&cl_lengths);

			assert_eq!(size, size_from_rle(&rle, &cl_lengths, hclen));
		}
	}

	#[test]
	fn t_tree_bits_match_prediction() {
		// The bits actually written must equal the predicted size.
		let (ll, d) = sample_lengths();
		let (extra, size) = best_tree_size(&ll, &d, true).unwrap();
		let mut w = BitWriter::new();
		encode_tree(&ll, &d, extra, &mut w).unwrap();
		assert_eq!(w.len_bits(), size as usize);
	}

	#[test]
	fn t_rle_reconstructs() {
		// Expanding the RLE record must reproduce the merged lengths
		// exactly, under every variant.
		let (ll, d) = sample_lengths();
		let (all, _, _) = tree_symbols(&ll, &d);
		for extra in 0..32 {
			let mut rle = Vec::new();
			let _counts = rle_symbols(&all, extra, Some(&mut rle));

			let mut expanded: Vec<u8> = Vec::new();
			for (sym, val) in rle {
				match sym {
					16 => {
						let prev = *expanded.last().expect("rep16 with no previous");
						for _ in 0..val + 3 { expanded.push(prev); }
					},
					17 => { for _ in 0..val + 3 { expanded.push(0); } },
					18 => { for _ in 0..val + 11 { expanded.push(0); } },
					s => expanded.push(s),
				}
			}

			assert_eq!(expanded, all, "variant {extra} corrupted the lengths");
		}
	}

	#[test]
	fn t_d_patch() {
		// No distances at all: the first two get phantom codes.
		let d = patched_d_lengths(&[0; NUM_D], 15).unwrap();
		assert_eq!(d[0], 1);
		assert_eq!(d[1], 1);

		// One distance: a second phantom appears.
		let mut counts = [0_u32; NUM_D];
		counts[4] = 10;
		let d = patched_d_lengths(&counts, 15).unwrap();
		assert!(d[4] > 0);
		assert_eq!(d.iter().filter(|&&l| l != 0).count(), 2);
	}

	#[test]
	fn t_optimize_for_rle() {
		// Near-equal strides collapse to a single value.
		let mut counts = [10_u32, 11, 10, 12, 10, 11, 10, 12, 0, 0, 0, 0, 0, 0];
		optimize_for_rle(&mut counts);
		let first = counts[0];
		assert!(counts[..8].iter().all(|&c| c == first));
		assert!(counts[8..].iter().all(|&c| c == 0), "trailing zeroes must survive");

		// The streak-averaging variant also preserves trailing zeroes.
		let mut counts2 = [10_u32, 11, 10, 12, 10, 11, 10, 12, 0, 0, 0, 0, 0, 0];
		optimize_for_rle_brotli(&mut counts2);
		assert!(counts2[8..].iter().all(|&c| c == 0));
	}

	#[test]
	fn t_dynamic_lengths() {
		// End-to-end: the chosen lengths must be valid (≤15, ≥2 distance
		// codes) and every used symbol must have a code.
		let mut ll_counts = [0_u32; NUM_LL];
		for i in 60..80 { ll_counts[i] = (i as u32 % 7) + 1; }
		ll_counts[256] = 1;
		let mut d_counts = [0_u32; NUM_D];
		d_counts[3] = 12;
		d_counts[7] = 2;

		for advanced in [false, true] {
			let (_extra, _size, ll, d) = get_dynamic_lengths(&ll_counts, &d_counts, advanced).unwrap();
			assert!(ll.iter().all(|&l| l <= 15));
			assert!(d.iter().all(|&l| l <= 15));
			assert!(d.iter().take(30).filter(|&&l| l != 0).count() >= 2);
			for i in 0..NUM_LL {
				if ll_counts[i] != 0 { assert!(ll[i] != 0, "used symbol {i} lost its code"); }
			}
		}
	}
}
