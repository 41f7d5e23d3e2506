/*!
# Mafli: Caches.

The longest-match cache memoizes finder results per position within a master
block so the iterative squeeze passes don't redo the same chain walks, and
the squeeze cache holds the cost/path scratch those passes chew through.
*/

use crate::{
	error::{
		mafli_error,
		MafliError,
	},
	symbols::{
		MAX_MATCH,
		MIN_MATCH,
		SUBLEN_LEN,
	},
};



/// # Default Length (1) and Distance (0).
///
/// Length and distance are always fetched/stored together, so are packed
/// into one little-endian `u32` to halve the indexing.
const DEFAULT_LD: u32 = u32::from_le_bytes([1, 0, 0, 0]);

/// # Sublength Cache Entries Per Position.
const CACHE_LENGTH: usize = 8;

/// # Bytes Per Cached Sublength Record.
///
/// Each entry takes three bytes: a packed length and a 16-bit distance.
const SUBLEN_CACHED_LEN: usize = CACHE_LENGTH * 3;



/// # Longest Match Cache.
///
/// One record per position of the current master block: the best length and
/// distance, plus a compressed sublength table holding up to eight
/// distinct-distance break points. A record of `length == 1, distance == 0`
/// means "not computed yet"; `length == 0, distance == 0` means "computed,
/// nothing matchable".
pub(crate) struct MatchCache {
	/// # Length and Distance Pairs.
	ld: Vec<u32>,

	/// # Compressed Sublength Records.
	sublen: Vec<u8>,
}

impl MatchCache {
	/// # New (Empty).
	pub(crate) const fn new() -> Self {
		Self { ld: Vec::new(), sublen: Vec::new() }
	}

	/// # Initialize for a Block.
	pub(crate) fn init(&mut self, blocksize: usize) {
		self.ld.clear();
		self.ld.resize(blocksize, DEFAULT_LD);
		self.sublen.clear();
		self.sublen.resize(blocksize * SUBLEN_CACHED_LEN, 0);
	}

	/// # Find a Cached Match.
	///
	/// Results are written back through the mutable arguments; the returned
	/// bool reports whether the cache had an answer at all.
	pub(crate) fn find(
		&self,
		pos: usize,
		limit: &mut u16,
		sublen: &mut Option<&mut [u16; SUBLEN_LEN]>,
		distance: &mut u16,
		length: &mut u16,
	) -> Result<bool, MafliError> {
		if pos >= self.ld.len() { return Err(mafli_error!()); }

		let (cache_len, cache_dist) = ld_split(self.ld[pos]);

		// The not-computed-yet sentinel.
		if cache_len != 0 && cache_dist == 0 { return Ok(false); }

		let rec = &self.sublen[pos * SUBLEN_CACHED_LEN..(pos + 1) * SUBLEN_CACHED_LEN];

		// Find the max cached sublength once, if it will matter.
		let maxlength =
			if sublen.is_none() { 0 }
			else { max_sublen(rec) };

		// Proceed if the cached data can satisfy the requested limit.
		if
			usize::from(*limit) == MAX_MATCH ||
			cache_len <= *limit ||
			(sublen.is_some() && maxlength >= *limit)
		{
			if sublen.is_none() || cache_len <= maxlength {
				*length = u16::min(cache_len, *limit);

				if let Some(s) = sublen {
					if usize::from(*length) >= MIN_MATCH {
						write_sublen(rec, s);
						*distance = s[usize::from(*length)];

						// The sublength distance at the full length must
						// agree with the redundantly-cached distance.
						if
							usize::from(*limit) == MAX_MATCH &&
							*length == cache_len &&
							*distance != cache_dist
						{
							return Err(mafli_error!());
						}
					}
					else { *distance = cache_dist; }
				}
				else { *distance = cache_dist; }

				return Ok(true);
			}

			// The caller wants sublengths we don't have; lower the limit to
			// what the fresh search actually needs to cover.
			*limit = cache_len;
		}

		Ok(false)
	}

	/// # Store a Match.
	///
	/// Saves the finder's full-limit results, compressing the sublength
	/// table down to its distance break points.
	pub(crate) fn set_sublen(
		&mut self,
		pos: usize,
		sublen: &[u16; SUBLEN_LEN],
		distance: u16,
		length: u16,
	) -> Result<(), MafliError> {
		if pos >= self.ld.len() { return Err(mafli_error!()); }

		// Only the not-computed sentinel is writable.
		if DEFAULT_LD != self.ld[pos] {
			let (cache_len, cache_dist) = ld_split(self.ld[pos]);
			if cache_dist != 0 || cache_len == 0 { return Ok(()); }
			return Err(mafli_error!());
		}

		// Nothing matchable is itself worth remembering.
		if usize::from(length) < MIN_MATCH {
			self.ld[pos] = 0;
			return Ok(());
		}

		if distance == 0 { return Err(mafli_error!()); }
		self.ld[pos] = ld_join(length, distance);

		// Record a break point everywhere the distance changes, lengths
		// stored minus three so they fit a byte.
		let rec = &mut self.sublen[pos * SUBLEN_CACHED_LEN..(pos + 1) * SUBLEN_CACHED_LEN];
		let slice = &sublen[MIN_MATCH..=usize::from(length)];
		let mut written = 0;
		for (i, pair) in slice.windows(2).enumerate() {
			if pair[0] != pair[1] {
				if written == CACHE_LENGTH { return Ok(()); }
				rec[written * 3] = i as u8;
				rec[written * 3 + 1..written * 3 + 3].copy_from_slice(&pair[0].to_le_bytes());
				written += 1;
			}
		}

		// The final value is implicitly a break point too.
		if written < CACHE_LENGTH {
			rec[written * 3] = (length as usize - MIN_MATCH) as u8;
			rec[written * 3 + 1..written * 3 + 3]
				.copy_from_slice(&slice[slice.len() - 1].to_le_bytes());

			// Copy (only) the length to the last slot to simplify max
			// lookups later.
			if written + 1 < CACHE_LENGTH {
				rec[(CACHE_LENGTH - 1) * 3] = (length as usize - MIN_MATCH) as u8;
			}
		}

		Ok(())
	}
}



/// # Squeeze Scratch.
///
/// Per-position costs (with the length of the edge taken) and the traced
/// path for the shortest-path passes. Reused across iterations and blocks.
pub(crate) struct SqueezeCache {
	/// # Cost and Incoming Edge Length per Position.
	costs: Vec<(f32, u16)>,

	/// # Traced Path.
	paths: Vec<u16>,
}

impl SqueezeCache {
	/// # New.
	pub(crate) const fn new() -> Self {
		Self { costs: Vec::new(), paths: Vec::new() }
	}

	/// # Resize for a Block.
	///
	/// The cost table needs one entry more than the block has bytes.
	pub(crate) fn resize(&mut self, blocksize: usize) {
		self.costs.clear();
		self.costs.resize(blocksize + 1, (0.0, 0));
	}

	/// # Reset Costs and Return Them.
	///
	/// Position zero costs nothing; everything else starts unreachable.
	pub(crate) fn reset_costs(&mut self) -> &mut [(f32, u16)] {
		if let Some((first, rest)) = self.costs.split_first_mut() {
			first.0 = 0.0;
			for c in rest { c.0 = f32::INFINITY; }
		}
		&mut self.costs
	}

	/// # Trace the Chosen Path.
	///
	/// Walks the edge lengths backward from the end, returning the lengths
	/// in forward order.
	pub(crate) fn trace_paths(&mut self) -> Result<&[u16], MafliError> {
		self.paths.clear();
		if self.costs.len() < 2 { return Ok(&self.paths); }

		let mut idx = self.costs.len() - 1;
		while idx != 0 {
			let v = self.costs[idx].1;
			if v == 0 || usize::from(v) > idx || usize::from(v) > MAX_MATCH {
				return Err(mafli_error!());
			}
			self.paths.push(v);
			idx -= usize::from(v);
		}

		self.paths.reverse();
		Ok(&self.paths)
	}
}



/// # Join Length and Distance.
const fn ld_join(length: u16, distance: u16) -> u32 {
	let [l1, l2] = length.to_le_bytes();
	let [d1, d2] = distance.to_le_bytes();
	u32::from_le_bytes([l1, l2, d1, d2])
}

/// # Split Length and Distance.
const fn ld_split(ld: u32) -> (u16, u16) {
	let [l1, l2, d1, d2] = ld.to_le_bytes();
	(u16::from_le_bytes([l1, l2]), u16::from_le_bytes([d1, d2]))
}

/// # Max Cached Sublength.
///
/// Each three-byte record entry holds its (packed) length first; the last
/// meaningful entry holds the maximum.
fn max_sublen(rec: &[u8]) -> u16 {
	// No distance in the first entry means nothing was cached.
	if rec[1] == 0 && rec[2] == 0 { 0 }
	else { u16::from(rec[(CACHE_LENGTH - 1) * 3]) + MIN_MATCH as u16 }
}

/// # Expand a Cached Sublength Record.
fn write_sublen(rec: &[u8], dst: &mut [u16; SUBLEN_LEN]) {
	let maxlength = usize::from(max_sublen(rec));
	let mut old = 0;
	for chunk in rec.chunks_exact(3) {
		let length = usize::from(chunk[0]) + MIN_MATCH;
		if old <= length {
			let value = u16::from_le_bytes([chunk[1], chunk[2]]);
			dst[old.max(MIN_MATCH)..=length].fill(value);
		}
		if length >= maxlength { return; }
		old = length + 1;
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_ld_split_join() {
		let (len, dist) = ld_split(DEFAULT_LD);
		assert_eq!(len, 1);
		assert_eq!(dist, 0);
		assert_eq!(DEFAULT_LD, ld_join(len, dist));

		let packed = ld_join(258, 31_000);
		assert_eq!(ld_split(packed), (258, 31_000));
	}

	#[test]
	fn t_sublen_roundtrip() {
		// Build a plausible sublength table: distance 5 up to length 10,
		// then 900 up to length 30.
		let mut sublen = [0_u16; SUBLEN_LEN];
		for i in MIN_MATCH..=10 { sublen[i] = 5; }
		for i in 11..=30 { sublen[i] = 900; }

		let mut cache = MatchCache::new();
		cache.init(4);
		cache.set_sublen(2, &sublen, 900, 30).expect("store failed");

		// Fetch it back.
		let mut out = [0_u16; SUBLEN_LEN];
		let mut limit = MAX_MATCH as u16;
		let mut distance = 0;
		let mut length = 0;
		let hit = cache.find(2, &mut limit, &mut Some(&mut out), &mut distance, &mut length)
			.expect("find failed");

		assert!(hit);
		assert_eq!(length, 30);
		assert_eq!(distance, 900);
		assert_eq!(&out[MIN_MATCH..=30], &sublen[MIN_MATCH..=30]);
	}

	#[test]
	fn t_no_match_cached() {
		let mut cache = MatchCache::new();
		cache.init(4);

		// Nothing stored yet: a miss.
		let mut limit = MAX_MATCH as u16;
		let mut distance = 0;
		let mut length = 0;
		assert!(! cache.find(1, &mut limit, &mut None, &mut distance, &mut length).unwrap());

		// Store a "no match" fact and try again: now a hit, length zero.
		let sublen = [0_u16; SUBLEN_LEN];
		cache.set_sublen(1, &sublen, 0, 1).expect("store failed");
		assert!(cache.find(1, &mut limit, &mut None, &mut distance, &mut length).unwrap());
		assert_eq!(length, 0);
	}
}
