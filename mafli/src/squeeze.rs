/*!
# Mafli: Squeeze.

The optimal LZ77 parser: a forward shortest-path pass over the input using a
per-symbol cost model, a backward trace, and a follow pass that turns the
traced lengths back into tokens. The cost model comes from symbol statistics
gathered on earlier passes (or the fixed-tree costs on the first).
*/

use crate::{
	cache::MatchCache,
	error::{
		mafli_error,
		MafliError,
	},
	hash::{
		EngineState,
		MatchHash,
	},
	lz77::Lz77Store,
	symbols::{
		ArrayD,
		ArrayLL,
		DISTANCE_BITS,
		DISTANCE_SYMBOLS,
		LENGTH_SYMBOL_BITS,
		LENGTH_SYMBOLS,
		MAX_MATCH,
		MIN_MATCH,
		NUM_D,
		NUM_LL,
		SUBLEN_LEN,
		WINDOW_SIZE,
	},
};

/// # Distance Extra Bits for the Minimum-Cost Scan.
const MIN_COST_DISTANCES: [u8; 30] = [
	0, 0, 0, 0, 1, 1, 2, 2, 3, 3,
	4, 4, 5, 5, 6, 6, 7, 7, 8, 8,
	9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];



#[derive(Clone, Copy)]
/// # Randomness.
///
/// A simple, repeatable multiply-with-carry generator, used only to shuffle
/// stat frequencies between squeeze passes.
pub(crate) struct RanState {
	m_w: u32,
	m_z: u32,
}

impl RanState {
	/// # New Instance.
	pub(crate) const fn new() -> Self {
		Self { m_w: 1, m_z: 2 }
	}

	/// # Generate a Random Number.
	const fn next(&mut self) -> u32 {
		self.m_z = 36_969_u32.wrapping_mul(self.m_z & 65_535).wrapping_add(self.m_z >> 16);
		self.m_w = 18_000_u32.wrapping_mul(self.m_w & 65_535).wrapping_add(self.m_w >> 16);
		(self.m_z << 16).wrapping_add(self.m_w)
	}
}



#[derive(Clone, Copy)]
/// # Symbol Statistics.
///
/// Two histograms and their derived bit-cost tables. The cost tables are
/// only valid for the counts they were last crunched from; callers crunch
/// before every squeeze pass.
pub(crate) struct SymbolStats {
	/// # Litlen Symbol Counts.
	ll_counts: ArrayLL<u32>,

	/// # Distance Symbol Counts.
	d_counts: ArrayD<u32>,

	/// # Litlen Symbol Costs (Bits).
	pub(crate) ll_symbols: ArrayLL<f64>,

	/// # Distance Symbol Costs (Bits).
	pub(crate) d_symbols: ArrayD<f64>,
}

impl SymbolStats {
	/// # New Instance.
	pub(crate) const fn new() -> Self {
		Self {
			ll_counts: [0; NUM_LL],
			d_counts: [0; NUM_D],
			ll_symbols: [0.0; NUM_LL],
			d_symbols: [0.0; NUM_D],
		}
	}

	/// # Crunch Symbol Costs.
	///
	/// Sets each symbol's cost to its self-information: `log2(total) -
	/// log2(count)`. Unused symbols get the full `log2(total)`.
	pub(crate) fn crunch(&mut self) {
		crunch_one(&self.ll_counts, &mut self.ll_symbols);
		crunch_one(&self.d_counts, &mut self.d_symbols);
	}

	/// # Load Counts From a Store.
	///
	/// Adds the store's symbol occurrences to the counts and pins the
	/// end-of-block symbol. Does _not_ re-crunch.
	pub(crate) fn load_store(&mut self, store: &Lz77Store) {
		for i in 0..store.len() {
			let dist = store.dist(i);
			if dist == 0 {
				self.ll_counts[store.litlen(i) as usize] += 1;
			}
			else {
				self.ll_counts[LENGTH_SYMBOLS[store.litlen(i) as usize] as usize] += 1;
				self.d_counts[DISTANCE_SYMBOLS[dist as usize] as usize] += 1;
			}
		}
		self.ll_counts[256] = 1;
	}

	/// # Reload Counts From a Store.
	///
	/// Clears the counts first, or halves them, which folds the previous
	/// pass in as a weighted average once randomization has kicked in.
	pub(crate) fn reload_store(&mut self, store: &Lz77Store, weighted: bool) {
		if weighted {
			for c in &mut self.ll_counts { *c /= 2; }
			for c in &mut self.d_counts { *c /= 2; }
		}
		else {
			self.ll_counts.fill(0);
			self.d_counts.fill(0);
		}
		self.load_store(store);
	}

	/// # Randomize Frequencies.
	///
	/// Replaces roughly a third of the counts with those of other, randomly
	/// chosen symbols, to shake the iteration out of a local minimum.
	/// Litlens must be shuffled before distances so results stay
	/// reproducible.
	pub(crate) fn randomize(&mut self, state: &mut RanState) {
		fn shuffle<const N: usize>(counts: &mut [u32; N], state: &mut RanState) {
			for i in 0..N {
				if (state.next() >> 4) % 3 == 0 {
					counts[i] = counts[state.next() as usize % N];
				}
			}
		}
		shuffle(&mut self.ll_counts, state);
		shuffle(&mut self.d_counts, state);
		self.ll_counts[256] = 1;
	}

	/// # Additive Cost Corrections for PNG Data.
	///
	/// Empirically tuned adjustments applied to a freshly seeded model when
	/// only one squeeze pass will run over filtered image rows. The numbers
	/// have no derivation; do not retune them casually. Costs never drop
	/// below zero.
	pub(crate) fn calibrate_for_png(&mut self, blocksize: usize) {
		for c in self.ll_symbols.iter_mut().take(256) { *c -= 0.4; }
		if blocksize < 1000 {
			for c in self.ll_symbols.iter_mut().take(256) { *c -= 0.2; }
		}
		self.ll_symbols[0] -= 1.0;
		self.d_symbols[0] -= 1.5;
		self.d_symbols[3] -= 1.4;
		self.ll_symbols[255] -= 0.5;
		self.ll_symbols[257] -= 1.2;
		self.ll_symbols[258] += 0.3;
		self.ll_symbols[272] += 1.2;
		self.ll_symbols[282] += 0.2;
		self.ll_symbols[283] += 0.2;
		self.ll_symbols[284] += 0.4;
		if blocksize < WINDOW_SIZE && blocksize > 100 {
			let from = usize::from(DISTANCE_SYMBOLS[blocksize]).saturating_sub(1);
			for c in self.d_symbols.iter_mut().skip(from) { *c += 0.5; }
		}

		for c in &mut self.ll_symbols {
			if *c < 0.0 { *c = 0.0; }
		}
		for c in &mut self.d_symbols {
			if *c < 0.0 { *c = 0.0; }
		}
	}
}

/// # Crunch One Histogram.
fn crunch_one<const N: usize>(counts: &[u32; N], symbols: &mut [f64; N]) {
	let sum = counts.iter().copied().map(u64::from).sum::<u64>();
	let log2sum =
		if sum == 0 { (N as f64).log2() }
		else { (sum as f64).log2() };

	for (c, b) in counts.iter().copied().zip(symbols.iter_mut()) {
		*b =
			if c == 0 { log2sum }
			else { log2sum - f64::from(c).log2() };
	}
}



/// # Pre-Expanded Cost Tables.
///
/// Extended-bit contributions folded into tables keyed on the actual length
/// and distance values, so the inner squeeze loop is one lookup per edge.
pub(crate) struct CostTables {
	/// # Cost of a Match, by Length.
	litlen: [f32; 259],

	/// # Cost of a Match, by Distance.
	dist: Box<[f32]>,

	/// # Cost of a Literal, by Byte Value.
	literal: [f32; 256],

	/// # Cheapest Possible Match.
	min_cost: f64,

	/// # Max-Length Run Cost (Length 258, Distance 1).
	run_cost: f64,
}

impl CostTables {
	/// # Build From Stats (or the Fixed Tree).
	pub(crate) fn new(stats: Option<&SymbolStats>) -> Self {
		let mut litlen = [0.0_f32; 259];
		let mut dist = vec![0.0_f32; WINDOW_SIZE].into_boxed_slice();
		let mut literal = [0.0_f32; 256];

		if let Some(s) = stats {
			for (i, c) in litlen.iter_mut().enumerate().skip(MIN_MATCH) {
				*c = (s.ll_symbols[LENGTH_SYMBOLS[i] as usize]
					+ f64::from(LENGTH_SYMBOL_BITS[i])) as f32;
			}
			for (d, c) in dist.iter_mut().enumerate() {
				let sym = DISTANCE_SYMBOLS[d] as usize;
				*c = (s.d_symbols[sym] + f64::from(DISTANCE_BITS[sym])) as f32;
			}
			for (i, c) in literal.iter_mut().enumerate() {
				*c = s.ll_symbols[i] as f32;
			}

			// The minimum statistical cost of any match at all.
			let mut length_cost = f64::INFINITY;
			for i in MIN_MATCH..=MAX_MATCH {
				let cost = s.ll_symbols[LENGTH_SYMBOLS[i] as usize]
					+ f64::from(LENGTH_SYMBOL_BITS[i]);
				if cost < length_cost { length_cost = cost; }
			}
			let mut dist_cost = f64::INFINITY;
			for (bits, v) in MIN_COST_DISTANCES.iter().copied().zip(s.d_symbols) {
				let cost = f64::from(bits) + v;
				if cost < dist_cost { dist_cost = cost; }
			}

			Self {
				litlen,
				dist,
				literal,
				min_cost: length_cost + dist_cost,
				run_cost: s.ll_symbols[285] + s.d_symbols[0],
			}
		}
		else {
			// Fixed-tree costs: seven or eight bits for the length symbol,
			// five for the distance, plus extras.
			for (i, c) in litlen.iter_mut().enumerate().skip(MIN_MATCH) {
				*c = (12 + u8::from(114 < i) + LENGTH_SYMBOL_BITS[i]) as f32;
			}
			for (d, c) in dist.iter_mut().enumerate() {
				*c = f32::from(DISTANCE_BITS[DISTANCE_SYMBOLS[d] as usize]);
			}
			for (i, c) in literal.iter_mut().enumerate() {
				*c = if i <= 143 { 8.0 } else { 9.0 };
			}

			Self { litlen, dist, literal, min_cost: 12.0, run_cost: 13.0 }
		}
	}
}



impl EngineState {
	/// # Optimal Squeeze Run.
	///
	/// One forward/backward shortest-path pass over `arr[instart..]`,
	/// writing the resulting tokens to `store`. `stats` selects the dynamic
	/// cost model; `None` means fixed-tree costs.
	pub(crate) fn optimal_run(
		&mut self,
		arr: &[u8],
		instart: usize,
		stats: Option<&SymbolStats>,
		store: &mut Lz77Store,
	) -> Result<(), MafliError> {
		store.clear();
		if instart >= arr.len() { return Ok(()); }

		let tables = CostTables::new(stats);
		let costs = self.squeeze.reset_costs();

		get_best_lengths(&mut self.hash, &mut self.lmc, arr, instart, &tables, costs)?;
		let paths = self.squeeze.trace_paths()?;
		if ! paths.is_empty() {
			follow_paths(&mut self.hash, &mut self.lmc, arr, instart, paths, store)?;
		}

		Ok(())
	}
}

/// # Forward Pass.
///
/// Computes, for every position, the cheapest way to reach it: relaxing a
/// literal edge and one back-reference edge per reachable length.
fn get_best_lengths(
	hash: &mut MatchHash,
	lmc: &mut MatchCache,
	arr: &[u8],
	instart: usize,
	tables: &CostTables,
	costs: &mut [(f32, u16)],
) -> Result<(), MafliError> {
	debug_assert!(costs.len() == arr.len() - instart + 1);

	hash.reset(arr, instart);
	let mut sublen = [0_u16; SUBLEN_LEN];

	let mut i = instart;
	while i < arr.len() {
		hash.update(arr, i);

		// Deep inside a long run of one byte, every position's best edge is
		// a max-length match at distance one; batch MAX_MATCH of them and
		// skip the finder.
		if
			i > instart + MAX_MATCH + 1 &&
			arr.len() > i + MAX_MATCH * 2 + 1 &&
			usize::from(hash.same_at(i)) > MAX_MATCH * 2 &&
			usize::from(hash.same_at(i - MAX_MATCH)) > MAX_MATCH
		{
			let mut j = i - instart;
			for _ in 0..MAX_MATCH {
				costs[j + MAX_MATCH] = (
					(f64::from(costs[j].0) + tables.run_cost) as f32,
					MAX_MATCH as u16,
				);
				j += 1;
				i += 1;
				hash.update(arr, i);
			}
		}

		let (_dist, length) = hash.find(
			arr,
			i,
			MAX_MATCH as u16,
			MAX_MATCH as u16,
			&mut Some(&mut sublen),
			lmc,
			Some(instart),
		)?;

		let j = i - instart;
		if j + 1 >= costs.len() { break; }
		let cost_j = f64::from(costs[j].0);

		// Literal edge.
		let new_cost = cost_j + f64::from(tables.literal[usize::from(arr[i])]);
		if new_cost >= 0.0 && new_cost < f64::from(costs[j + 1].0) {
			costs[j + 1] = (new_cost as f32, 1);
		}

		// Back-reference edges, but only where they could possibly beat
		// what's already there.
		let limit = usize::min(usize::from(length), costs.len() - 1 - j);
		if limit >= MIN_MATCH {
			let min_cost_add = tables.min_cost + cost_j;
			for k in MIN_MATCH..=limit {
				if min_cost_add < f64::from(costs[j + k].0) {
					let d = sublen[k];
					if d == 0 { continue; }
					let new_cost = cost_j
						+ f64::from(tables.litlen[k])
						+ f64::from(tables.dist[usize::from(d)]);
					if new_cost >= 0.0 && new_cost < f64::from(costs[j + k].0) {
						costs[j + k] = (new_cost as f32, k as u16);
					}
				}
			}
		}

		i += 1;
	}

	debug_assert!(costs.iter().all(|(cost, _)| (0.0..1E30).contains(cost)));
	Ok(())
}

/// # Follow the Traced Path.
///
/// Replays the chosen edge lengths, rediscovering each match's distance by
/// re-running the finder (and double-checking the lengths agree).
fn follow_paths(
	hash: &mut MatchHash,
	lmc: &mut MatchCache,
	arr: &[u8],
	instart: usize,
	paths: &[u16],
	store: &mut Lz77Store,
) -> Result<(), MafliError> {
	if instart >= arr.len() { return Ok(()); }

	hash.reset(arr, instart);

	let mut i = instart;
	for length in paths.iter().copied() {
		if i >= arr.len() { return Err(mafli_error!()); }
		hash.update(arr, i);

		if usize::from(length) >= MIN_MATCH {
			// Recalculate the longest match capped to this length; the
			// result must land exactly on it.
			let (dist, test_length) = hash.find(
				arr,
				i,
				length,
				length,
				&mut None,
				lmc,
				Some(instart),
			)?;
			if test_length != length || dist == 0 {
				return Err(mafli_error!());
			}

			store.push(length, dist, i)?;

			for _ in 1..length {
				i += 1;
				hash.update(arr, i);
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
mod tests {
	use super::*;
	use crate::lz77::tests::decode;

	#[test]
	fn t_ran_state() {
		// Deterministic and actually varying.
		let mut a = RanState::new();
		let mut b = RanState::new();
		let series: Vec<u32> = (0..8).map(|_| a.next()).collect();
		let series2: Vec<u32> = (0..8).map(|_| b.next()).collect();
		assert_eq!(series, series2);
		assert!(series.windows(2).any(|w| w[0] != w[1]));
	}

	#[test]
	fn t_crunch() {
		let mut stats = SymbolStats::new();
		stats.ll_counts[65] = 3;
		stats.ll_counts[66] = 1;
		stats.ll_counts[256] = 1;
		stats.crunch();

		// More frequent symbols must cost less.
		assert!(stats.ll_symbols[65] < stats.ll_symbols[66]);
		// Unused symbols cost the most.
		assert!(stats.ll_symbols[66] <= stats.ll_symbols[67]);
	}

	#[test]
	fn t_calibrate_floor() {
		// The corrections can push low costs negative; the floor holds.
		let mut stats = SymbolStats::new();
		stats.ll_counts[0] = 1000;
		stats.ll_counts[256] = 1;
		stats.crunch();
		stats.calibrate_for_png(500);
		assert!(stats.ll_symbols.iter().all(|&c| c >= 0.0));
		assert!(stats.d_symbols.iter().all(|&c| c >= 0.0));
	}

	#[test]
	fn t_optimal_roundtrip() {
		let mut data = Vec::new();
		for i in 0_u32..600 {
			data.extend_from_slice(b"abcdefgh");
			data.push((i % 256) as u8);
		}

		let mut state = EngineState::new();
		state.init_lmc(data.len());
		let mut store = Lz77Store::new();
		state.optimal_run(&data, 0, None, &mut store).expect("squeeze failed");
		assert_eq!(decode(&store), data);

		// And with a statistical model seeded from a greedy pass.
		let mut seed = Lz77Store::new();
		let mut state2 = EngineState::new();
		state2.init_lmc(data.len());
		crate::lz77::greedy(&mut state2, &data, 0, &mut seed, Some(0)).unwrap();
		let mut stats = SymbolStats::new();
		stats.load_store(&seed);
		stats.crunch();

		let mut store2 = Lz77Store::new();
		state2.optimal_run(&data, 0, Some(&stats), &mut store2).expect("squeeze failed");
		assert_eq!(decode(&store2), data);
	}

	#[test]
	fn t_optimal_long_run() {
		// The long-repetition shortcut path.
		let data = vec![0_u8; 5000];
		let mut state = EngineState::new();
		state.init_lmc(data.len());
		let mut store = Lz77Store::new();
		state.optimal_run(&data, 0, None, &mut store).expect("squeeze failed");
		assert_eq!(decode(&store), data);
	}
}
