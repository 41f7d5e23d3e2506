/*!
# Mafli: Match Hashing.

A sliding-window hash over three-byte prefixes, used to find back-references.
Two chains coexist: the primary keyed on the rolling hash, and a secondary
keyed on the rolling hash XOR'd with the length of the same-byte run starting
at each position. The finder switches to the secondary chain once its best
match already exceeds the local run length, skipping the uninformative
positions inside long runs of a single byte.
*/

use crate::{
	cache::{
		MatchCache,
		SqueezeCache,
	},
	error::{
		mafli_error,
		MafliError,
	},
	EncoderOptions,
	symbols::{
		MAX_MATCH,
		MIN_MATCH,
		SUBLEN_LEN,
		WINDOW_SIZE,
	},
};

/// # Window Index Mask.
const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// # Rolling Hash Shift.
const HASH_SHIFT: i32 = 5;

/// # Rolling Hash Mask.
const HASH_MASK: i16 = 32_767;

/// # Chain Walk Ceiling.
const MAX_CHAIN_HITS: usize = 8192;



/// # Engine State.
///
/// This consolidates the hash, longest-match, and squeeze caches into a
/// single structure so fewer references get bounced from method to method.
/// One instance serves a worker for the lifetime of the run.
pub(crate) struct EngineState {
	/// # Match Hash.
	pub(crate) hash: MatchHash,

	/// # Longest Match Cache.
	pub(crate) lmc: MatchCache,

	/// # Squeeze Scratch.
	pub(crate) squeeze: SqueezeCache,

	/// # Early-Out Match Length.
	pub(crate) nice_match: u16,

	/// # Lazy/Greedy Switchover Score.
	pub(crate) greed: u16,
}

impl EngineState {
	/// # New (Default Knobs).
	pub(crate) fn new() -> Self {
		Self {
			hash: MatchHash::new(),
			lmc: MatchCache::new(),
			squeeze: SqueezeCache::new(),
			nice_match: MAX_MATCH as u16,
			greed: 259,
		}
	}

	/// # New, Tuned From Options.
	pub(crate) fn with_options(options: &EncoderOptions) -> Self {
		let mut out = Self::new();
		out.nice_match = options.nice_match;
		out.greed = options.greed;
		out
	}

	/// # (Re)Initialize the Match/Squeeze Caches.
	///
	/// Call before the iterative passes over a block of `blocksize` bytes.
	pub(crate) fn init_lmc(&mut self, blocksize: usize) {
		self.lmc.init(blocksize);
		self.squeeze.resize(blocksize);
	}
}



/// # Match Hash.
///
/// Byte values and hashes by (window-wrapped) position, enabling
/// match-finding at arbitrary offsets.
pub(crate) struct MatchHash {
	/// # Primary Chain.
	chain1: HashChain,

	/// # Secondary (Run-Keyed) Chain.
	chain2: HashChain,

	/// # Repetitions of the Same Byte From Each Position.
	same: Box<[u16]>,
}

impl MatchHash {
	/// # New.
	pub(crate) fn new() -> Self {
		Self {
			chain1: HashChain::new(),
			chain2: HashChain::new(),
			same: vec![0_u16; WINDOW_SIZE].into_boxed_slice(),
		}
	}

	/// # Reset and Warm Up.
	///
	/// Clears everything, seeds the rolling hash with the first byte or two
	/// of the window, then replays the prelude (up to `WINDOW_SIZE` bytes
	/// before `instart`) so back-references can reach into it.
	pub(crate) fn reset(&mut self, arr: &[u8], instart: usize) {
		self.chain1.reset();
		self.chain2.reset();
		self.same.fill(0);

		if instart >= arr.len() { return; }
		let windowstart = instart.saturating_sub(WINDOW_SIZE);
		self.update_hash_value(arr[windowstart]);
		if windowstart + 1 < arr.len() {
			self.update_hash_value(arr[windowstart + 1]);
		}

		for i in windowstart..instart { self.update(arr, i); }
	}

	/// # Update Hash at Position.
	///
	/// Cycles the rolling hash over the lookahead byte, records the position
	/// in both chains, and refreshes the same-byte run annotation.
	pub(crate) fn update(&mut self, arr: &[u8], pos: usize) {
		let hpos = pos & WINDOW_MASK;

		// Cycle the first hash with the lookahead byte (zero at the end).
		self.update_hash_value(arr.get(pos + MIN_MATCH - 1).copied().unwrap_or(0));
		self.chain1.update(pos);

		// Count up the repetitions.
		let mut amount = self.same[pos.wrapping_sub(1) & WINDOW_MASK]
			.saturating_sub(1);
		while
			amount < u16::MAX &&
			pos + usize::from(amount) + 1 < arr.len() &&
			arr[pos] == arr[pos + usize::from(amount) + 1]
		{
			amount += 1;
		}
		self.same[hpos] = amount;

		// Cycle the second hash off the run length.
		self.chain2.val = (((amount.wrapping_sub(MIN_MATCH as u16)) & 255) as i16) ^ self.chain1.val;
		self.chain2.update(pos);
	}

	/// # Cycle the Rolling Hash Value.
	fn update_hash_value(&mut self, c: u8) {
		self.chain1.val = ((self.chain1.val << HASH_SHIFT) ^ i16::from(c)) & HASH_MASK;
	}

	/// # Same-Run Length at Position.
	pub(crate) fn same_at(&self, pos: usize) -> u16 { self.same[pos & WINDOW_MASK] }

	#[expect(clippy::too_many_arguments, reason = "The finder touches everything.")]
	/// # Find the Longest Match.
	///
	/// Returns the best `(distance, length)` reachable from `pos`, never
	/// longer than `limit` nor `MAX_MATCH`. A length under `MIN_MATCH` means
	/// no usable match. When `sublen` is provided, entries `3..=length` are
	/// filled with the smallest distance reaching each exact length.
	///
	/// If `cache` names the block start, the longest-match cache is
	/// consulted first and fed afterwards.
	pub(crate) fn find(
		&self,
		arr: &[u8],
		pos: usize,
		mut limit: u16,
		nice: u16,
		sublen: &mut Option<&mut [u16; SUBLEN_LEN]>,
		lmc: &mut MatchCache,
		cache: Option<usize>,
	) -> Result<(u16, u16), MafliError> {
		// Check the longest-match cache first!
		if let Some(blockstart) = cache {
			let mut distance = 0_u16;
			let mut length = 0_u16;
			if lmc.find(pos - blockstart, &mut limit, sublen, &mut distance, &mut length)? {
				if pos + usize::from(length) <= arr.len() {
					return Ok((distance, length));
				}
				return Err(mafli_error!());
			}
		}

		// A search needs at least MIN_MATCH bytes of runway.
		if pos + MIN_MATCH > arr.len() {
			return Ok((0, 0));
		}

		// Cap the limit to fit. It remains at least one since pos is in
		// range.
		if usize::from(limit) > arr.len() - pos {
			limit = (arr.len() - pos) as u16;
		}

		let (bestdist, bestlength) = self.find_loop(arr, pos, limit, nice, sublen)?;

		// Cache the results for next time, maybe.
		if usize::from(limit) == MAX_MATCH {
			if let Some(blockstart) = cache {
				if let Some(s) = sublen.as_deref() {
					lmc.set_sublen(pos - blockstart, s, bestdist, bestlength)?;
				}
			}
		}

		if pos + usize::from(bestlength) <= arr.len() { Ok((bestdist, bestlength)) }
		else { Err(mafli_error!()) }
	}

	/// # Find Longest Match (Chain Walk).
	///
	/// The workhorse for `find`: walks the chains, extending candidate
	/// matches byte-by-byte, returning the best distance and length found,
	/// or `(0, 1)` if none.
	fn find_loop(
		&self,
		arr: &[u8],
		pos: usize,
		limit: u16,
		nice: u16,
		sublen: &mut Option<&mut [u16; SUBLEN_LEN]>,
	) -> Result<(u16, u16), MafliError> {
		/// # Window Distance Between Chain Positions.
		const fn ppp_distance(p: usize, pp: usize) -> usize {
			if p < pp { pp - p }
			else { WINDOW_SIZE + pp - p }
		}

		if arr.len() <= pos { return Err(mafli_error!()); }
		let right = &arr[pos..];
		let hpos = pos & WINDOW_MASK;
		let limit = usize::from(limit);
		let nice = usize::from(nice);

		let mut bestdist: usize = 0;
		let mut bestlength: usize = 1;

		// Start on the primary chain; we may switch midway.
		let mut switched = false;
		let mut chain = &self.chain1;

		let mut pp = hpos;
		let mut p =
			if chain.prev[hpos] < 0 { hpos }
			else { chain.prev[hpos] as usize };

		let mut dist = ppp_distance(p, pp);
		let mut hits = 0;
		let same0 = self.same[hpos];
		let same1 = usize::min(limit, usize::from(same0));

		while p < WINDOW_SIZE && dist < WINDOW_SIZE && hits < MAX_CHAIN_HITS {
			if dist != 0 && dist <= pos {
				let left = &arr[pos - dist..pos - dist + right.len()];

				// Cheap reject: the byte at the current best length has to
				// match before a full extension is worth the trouble.
				if bestlength >= right.len() || right[bestlength] == left[bestlength] {
					// Long runs on both sides let us start the comparison
					// deep into the match.
					let mut currentlength =
						if 2 < same0 && right[0] == left[0] {
							usize::min(same1, usize::from(self.same[(pos - dist) & WINDOW_MASK]))
						}
						else { 0 };

					while
						currentlength < limit &&
						currentlength < right.len() &&
						left[currentlength] == right[currentlength]
					{
						currentlength += 1;
					}

					if bestlength < currentlength {
						// Record the distance at which each new length
						// became reachable.
						if let Some(s) = sublen {
							s[bestlength + 1..=currentlength].fill(dist as u16);
						}

						bestdist = dist;
						bestlength = currentlength;

						// Far enough.
						if currentlength >= limit || currentlength >= nice { break; }
					}
				}
			}

			// If the second chain is looking better than the first, and we
			// haven't already switched, switch to it!
			if
				! switched &&
				usize::from(same0) <= bestlength &&
				self.chain2.hashval[p] == self.chain2.val
			{
				switched = true;
				chain = &self.chain2;
			}

			// No next previous match? Done.
			if chain.prev[p] < 0 { break; }

			pp = p;
			p = chain.prev[p] as usize;
			dist += ppp_distance(p, pp);
			hits += 1;
		}

		if bestlength <= limit { Ok((bestdist as u16, bestlength as u16)) }
		else { Ok((0, 1)) }
	}
}



/// # Hash Chain.
///
/// All recorded values fit `0..WINDOW_SIZE`; the sign bit is repurposed as a
/// cheap `None` for unwritten slots.
struct HashChain {
	/// # Hash Value to Most Recent Position.
	head: Box<[i16]>,

	/// # Position to Hash Value (Reverse of `head`).
	hashval: Box<[i16]>,

	/// # Position to the Previous Position With the Same Hash.
	prev: Box<[i16]>,

	/// # Current Hash Value.
	val: i16,
}

impl HashChain {
	/// # New.
	fn new() -> Self {
		Self {
			head: vec![-1_i16; WINDOW_SIZE].into_boxed_slice(),
			hashval: vec![-1_i16; WINDOW_SIZE].into_boxed_slice(),
			prev: vec![-1_i16; WINDOW_SIZE].into_boxed_slice(),
			val: 0,
		}
	}

	/// # Reset.
	fn reset(&mut self) {
		self.head.fill(-1);
		self.hashval.fill(-1);
		self.prev.fill(-1);
		self.val = 0;
	}

	/// # Record a Position Under the Current Hash Value.
	fn update(&mut self, pos: usize) {
		let hpos = pos & WINDOW_MASK;
		let hval = i16::max(0, self.val);

		self.hashval[hpos] = hval;

		// Link to the old head if it still carries this hash, otherwise the
		// position points at itself (the chain-terminating sentinel).
		let head = self.head[hval as usize];
		self.prev[hpos] =
			if 0 <= head && self.hashval[head as usize] == hval { head }
			else { hpos as i16 };

		self.head[hval as usize] = hpos as i16;
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_find_basic() {
		// "abcabc": at position three there's a length-three match at
		// distance three.
		let arr = b"abcabcxyz";
		let mut hash = MatchHash::new();
		let mut lmc = MatchCache::new();
		hash.reset(arr, 0);
		for i in 0..=3 { hash.update(arr, i); }

		let mut sublen = [0_u16; SUBLEN_LEN];
		let (dist, len) = hash.find(
			arr, 3, MAX_MATCH as u16, MAX_MATCH as u16,
			&mut Some(&mut sublen), &mut lmc, None,
		).expect("find failed");

		assert_eq!(dist, 3);
		assert_eq!(len, 3);
		assert_eq!(sublen[3], 3);
	}

	#[test]
	fn t_find_run() {
		// Inside a run of one byte, the best match is distance one at the
		// limit.
		let arr = vec![7_u8; 600];
		let mut hash = MatchHash::new();
		let mut lmc = MatchCache::new();
		hash.reset(&arr, 0);
		for i in 0..=300 { hash.update(&arr, i); }

		let (dist, len) = hash.find(
			&arr, 300, MAX_MATCH as u16, MAX_MATCH as u16,
			&mut None, &mut lmc, None,
		).expect("find failed");

		assert_eq!(dist, 1);
		assert_eq!(len, MAX_MATCH as u16);
	}

	#[test]
	fn t_find_none() {
		// All-distinct bytes: no matches anywhere.
		let arr: Vec<u8> = (0..=255).collect();
		let mut hash = MatchHash::new();
		let mut lmc = MatchCache::new();
		hash.reset(&arr, 0);
		for i in 0..=100 { hash.update(&arr, i); }

		let (dist, len) = hash.find(
			&arr, 100, MAX_MATCH as u16, MAX_MATCH as u16,
			&mut None, &mut lmc, None,
		).expect("find failed");

		assert_eq!(dist, 0);
		assert!(usize::from(len) < MIN_MATCH);
	}

	#[test]
	fn t_cache_agreement() {
		// A cached search must answer the same as a fresh one.
		let arr: Vec<u8> = b"abcabcabcXabcabc__abcabcabcXabc".to_vec();
		let mut hash = MatchHash::new();
		let mut lmc = MatchCache::new();
		lmc.init(arr.len());
		hash.reset(&arr, 0);

		let mut first = Vec::new();
		for pass in 0..2 {
			hash.reset(&arr, 0);
			let mut found = Vec::new();
			for i in 0..arr.len() {
				hash.update(&arr, i);
				let mut sublen = [0_u16; SUBLEN_LEN];
				let (dist, len) = hash.find(
					&arr, i, MAX_MATCH as u16, MAX_MATCH as u16,
					&mut Some(&mut sublen), &mut lmc, Some(0),
				).expect("find failed");

				// Sub-minimum lengths are all equally "no match".
				if usize::from(len) < MIN_MATCH { found.push((0, 0)); }
				else { found.push((dist, len)); }
			}
			if pass == 0 { first = found; }
			else { assert_eq!(first, found, "cached results diverged"); }
		}
	}
}
