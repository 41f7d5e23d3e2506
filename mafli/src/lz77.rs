/*!
# Mafli: LZ77 Store and Simple Parsers.

The store is an ordered token sequence: each entry is either a literal byte
(`dist == 0`) or a `(length, distance)` back-reference. The greedy and lazy
parsers live here too; the optimal ("squeeze") parser has its own module.
*/

use crate::{
	error::{
		mafli_error,
		MafliError,
	},
	hash::EngineState,
	symbols::{
		ArrayD,
		ArrayLL,
		LENGTH_SYMBOLS,
		DISTANCE_SYMBOLS,
		MIN_MATCH,
		MAX_MATCH,
		NUM_D,
		NUM_LL,
		SUBLEN_LEN,
	},
};



#[derive(Debug, Default, Clone)]
/// # LZ77 Token Store.
///
/// Three parallel arrays: the litlen value, the distance (zero for
/// literals), and the input byte position each token begins at. Positions
/// let the emitter map token ranges back onto raw bytes for stored blocks.
pub(crate) struct Lz77Store {
	litlens: Vec<u16>,
	dists: Vec<u16>,
	pos: Vec<usize>,
}

impl Lz77Store {
	/// # New.
	pub(crate) const fn new() -> Self {
		Self {
			litlens: Vec::new(),
			dists: Vec::new(),
			pos: Vec::new(),
		}
	}

	/// # Clear.
	pub(crate) fn clear(&mut self) {
		self.litlens.clear();
		self.dists.clear();
		self.pos.clear();
	}

	/// # Length (in Tokens).
	pub(crate) fn len(&self) -> usize { self.litlens.len() }

	/// # Is Empty?
	pub(crate) fn is_empty(&self) -> bool { self.litlens.is_empty() }

	/// # Push a Token.
	///
	/// Literals pass their byte value as `litlen` with a distance of zero;
	/// matches pass the match length and a non-zero distance.
	pub(crate) fn push(&mut self, litlen: u16, dist: u16, pos: usize)
	-> Result<(), MafliError> {
		if litlen < 259 && (dist as usize) < crate::symbols::WINDOW_SIZE {
			self.litlens.push(litlen);
			self.dists.push(dist);
			self.pos.push(pos);
			Ok(())
		}
		else { Err(mafli_error!()) }
	}

	/// # Token Accessors.
	pub(crate) fn litlen(&self, i: usize) -> u16 { self.litlens[i] }

	/// # Distance at Index.
	pub(crate) fn dist(&self, i: usize) -> u16 { self.dists[i] }

	/// # Input Position at Index.
	pub(crate) fn position(&self, i: usize) -> usize { self.pos[i] }

	/// # Decoded Length of a Token.
	///
	/// One byte for a literal, the match length otherwise.
	pub(crate) fn token_len(&self, i: usize) -> usize {
		if self.dists[i] == 0 { 1 }
		else { self.litlens[i] as usize }
	}

	/// # Append Another Store's Tokens.
	pub(crate) fn append(&mut self, other: &Self) {
		self.litlens.extend_from_slice(&other.litlens);
		self.dists.extend_from_slice(&other.dists);
		self.pos.extend_from_slice(&other.pos);
	}

	/// # Replace Contents With Another Store's.
	pub(crate) fn replace(&mut self, other: &Self) {
		self.litlens.clear();
		self.litlens.extend_from_slice(&other.litlens);
		self.dists.clear();
		self.dists.extend_from_slice(&other.dists);
		self.pos.clear();
		self.pos.extend_from_slice(&other.pos);
	}

	/// # Byte Range Covered by a Token Range.
	///
	/// Returns the `(instart, inend)` input positions spanned by tokens
	/// `lstart..lend`.
	pub(crate) fn byte_range(&self, lstart: usize, lend: usize)
	-> Result<(usize, usize), MafliError> {
		if lstart < lend && lend <= self.len() {
			Ok((self.pos[lstart], self.pos[lend - 1] + self.token_len(lend - 1)))
		}
		else if lstart == lend && lend <= self.len() {
			let p = self.pos.get(lstart).copied().unwrap_or(0);
			Ok((p, p))
		}
		else { Err(mafli_error!()) }
	}

	/// # Symbol Histogram Over a Token Range.
	pub(crate) fn histogram(&self, lstart: usize, lend: usize)
	-> (ArrayLL<u32>, ArrayD<u32>) {
		let mut ll_counts = [0_u32; NUM_LL];
		let mut d_counts = [0_u32; NUM_D];
		for i in lstart..lend.min(self.len()) {
			let dist = self.dists[i];
			if dist == 0 {
				ll_counts[self.litlens[i] as usize] += 1;
			}
			else {
				ll_counts[LENGTH_SYMBOLS[self.litlens[i] as usize] as usize] += 1;
				d_counts[DISTANCE_SYMBOLS[dist as usize] as usize] += 1;
			}
		}
		(ll_counts, d_counts)
	}
}



/// # Distance-Weighted Length Score.
///
/// Short matches reached through far distances cost almost as much as the
/// literals they replace, so their score is knocked down a point to
/// tie-break in the literals' favor.
pub(crate) const fn length_score(length: u16, dist: u16) -> u16 {
	match length {
		3 if dist > 1024 => 2,
		4 if dist > 2048 => 3,
		5 if dist > 4096 => 4,
		_ => length,
	}
}

/// # Greedy LZ77 Pass.
///
/// At each position take the longest match if one of at least `MIN_MATCH`
/// exists, otherwise emit a literal, and advance. No lookahead. This is the
/// seeding pass for the statistical cost model.
pub(crate) fn greedy(
	state: &mut EngineState,
	arr: &[u8],
	instart: usize,
	store: &mut Lz77Store,
	cache: Option<usize>,
) -> Result<(), MafliError> {
	store.clear();
	state.hash.reset(arr, instart);

	let mut sublen = [0_u16; SUBLEN_LEN];
	let mut i = instart;
	while i < arr.len() {
		state.hash.update(arr, i);

		let (dist, length) = state.hash.find(
			arr,
			i,
			MAX_MATCH as u16,
			state.nice_match,
			&mut Some(&mut sublen),
			&mut state.lmc,
			cache,
		)?;

		if (length as usize) >= MIN_MATCH {
			store.push(length, dist, i)?;
			for _ in 1..length {
				i += 1;
				state.hash.update(arr, i);
			}
		}
		else {
			store.push(u16::from(arr[i]), 0, i)?;
		}

		i += 1;
	}

	Ok(())
}

/// # Lazy LZ77 Pass.
///
/// Like the greedy pass, but a found match can be deferred one position: if
/// the next position offers a longer match, the current byte goes out as a
/// literal instead. Matches scoring at least `greed` are taken immediately
/// without the deferral dance.
pub(crate) fn lazy(
	state: &mut EngineState,
	arr: &[u8],
	instart: usize,
	store: &mut Lz77Store,
	cache: Option<usize>,
) -> Result<(), MafliError> {
	store.clear();
	state.hash.reset(arr, instart);

	let greed = state.greed;
	let mut sublen = [0_u16; SUBLEN_LEN];
	let mut prev_length: u16 = 0;
	let mut prev_dist: u16 = 0;
	let mut match_available = false;

	let mut i = instart;
	while i < arr.len() {
		state.hash.update(arr, i);

		let (dist, length) = state.hash.find(
			arr,
			i,
			MAX_MATCH as u16,
			state.nice_match,
			&mut Some(&mut sublen),
			&mut state.lmc,
			cache,
		)?;

		let score = length_score(length, dist);
		let prev_score = length_score(prev_length, prev_dist);

		if match_available {
			match_available = false;

			// The deferred match lost; emit the previous byte as a literal
			// and maybe defer again.
			if score > prev_score + 1 {
				store.push(u16::from(arr[i - 1]), 0, i - 1)?;
				if score >= MIN_MATCH as u16 && length < MAX_MATCH as u16 && score < greed {
					match_available = true;
					prev_length = length;
					prev_dist = dist;
					i += 1;
					continue;
				}
			}
			// The deferred match won; write it out.
			else {
				store.push(prev_length, prev_dist, i - 1)?;

				// The hash has to eat every byte the match covered. Two are
				// already in (the deferral position and this one).
				for _ in 2..prev_length {
					i += 1;
					state.hash.update(arr, i);
				}

				i += 1;
				continue;
			}
		}
		// No match in hand; maybe hold this one for the next round. (A
		// max-length match can't be beaten, so there's no point waiting.)
		else if score >= MIN_MATCH as u16 && length < MAX_MATCH as u16 && score < greed {
			match_available = true;
			prev_length = length;
			prev_dist = dist;
			i += 1;
			continue;
		}

		// Take the match at face value.
		if score >= MIN_MATCH as u16 {
			store.push(length, dist, i)?;
			for _ in 1..length {
				i += 1;
				state.hash.update(arr, i);
			}
		}
		else {
			store.push(u16::from(arr[i]), 0, i)?;
		}

		i += 1;
	}

	Ok(())
}



#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// # Decode a Store Back Into Bytes.
	///
	/// Test helper: replays tokens, verifying the back-reference invariant
	/// along the way.
	pub(crate) fn decode(store: &Lz77Store) -> Vec<u8> {
		let mut out = Vec::new();
		for i in 0..store.len() {
			let dist = store.dist(i) as usize;
			if dist == 0 {
				out.push(store.litlen(i) as u8);
			}
			else {
				let len = store.litlen(i) as usize;
				assert!((MIN_MATCH..=MAX_MATCH).contains(&len));
				assert!(dist <= out.len(), "distance reaches past the start");
				for _ in 0..len {
					let b = out[out.len() - dist];
					out.push(b);
				}
			}
		}
		out
	}

	#[test]
	fn t_greedy_run() {
		// 258 bytes of 0xAA: one literal to seed the window, then a single
		// (257, 1) back-reference.
		let data = vec![0xAA_u8; 258];
		let mut state = EngineState::new();
		let mut store = Lz77Store::new();
		greedy(&mut state, &data, 0, &mut store, None).expect("greedy failed");

		assert_eq!(store.len(), 2);
		assert_eq!(store.litlen(0), 0xAA);
		assert_eq!(store.dist(0), 0);
		assert_eq!(store.litlen(1), 257);
		assert_eq!(store.dist(1), 1);
		assert_eq!(decode(&store), data);
	}

	#[test]
	fn t_greedy_long_run() {
		// 1000 zeroes: a literal, then max-length back-references until the
		// tail runs out.
		let data = vec![0_u8; 1000];
		let mut state = EngineState::new();
		let mut store = Lz77Store::new();
		greedy(&mut state, &data, 0, &mut store, None).expect("greedy failed");

		assert_eq!(store.litlen(0), 0);
		assert_eq!(store.dist(0), 0);
		for i in 1..4 {
			assert_eq!(store.litlen(i), MAX_MATCH as u16);
			assert_eq!(store.dist(i), 1);
		}
		assert_eq!(decode(&store), data);
	}

	#[test]
	fn t_lazy_roundtrip() {
		let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog. \
			the quick brown fox jumps over the lazy dog again!".to_vec();
		let mut state = EngineState::new();
		let mut store = Lz77Store::new();
		lazy(&mut state, &data, 0, &mut store, None).expect("lazy failed");
		assert_eq!(decode(&store), data);
		assert!(store.len() < data.len(), "repetition should compress");
	}

	#[test]
	fn t_histogram() {
		let data = vec![0xAA_u8; 258];
		let mut state = EngineState::new();
		let mut store = Lz77Store::new();
		greedy(&mut state, &data, 0, &mut store, None).expect("greedy failed");

		let (ll, d) = store.histogram(0, store.len());
		assert_eq!(ll[0xAA], 1);
		assert_eq!(ll[LENGTH_SYMBOLS[257] as usize], 1);
		assert_eq!(d[0], 1); // Distance one is symbol zero.
	}
}
