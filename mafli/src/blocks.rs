/*!
# Mafli: Blocks.

Block layout and emission: estimating what a token range would cost as a
stored, fixed, or dynamic block; hunting for split points that minimize the
total; refining each block with the iterative squeeze; and finally writing
the winning configuration out bit by bit.
*/

use dactyl::NoHash;
use std::{
	collections::HashSet,
	sync::Mutex,
};
use crate::{
	deflate::BitWriter,
	error::{
		mafli_error,
		ContainerError,
		MafliError,
	},
	EncoderOptions,
	hash::EngineState,
	katajainen::canonical_symbols,
	lz77::{
		lazy,
		Lz77Store,
	},
	squeeze::{
		RanState,
		SymbolStats,
	},
	symbols::{
		ArrayD,
		ArrayLL,
		DISTANCE_BITS,
		DISTANCE_SYMBOLS,
		DISTANCE_VALUES,
		FIXED_TREE_D,
		FIXED_TREE_LL,
		LENGTH_SYMBOL_BITS,
		LENGTH_SYMBOL_VALUES,
		LENGTH_SYMBOLS,
		MIN_MATCH,
	},
	tree,
};



/// # Minimum Split Distance (in Tokens).
const MINIMUM_SPLIT_DISTANCE: usize = 10;

/// # Maximum Split Points Per Master Block.
const MAX_SPLIT_POINTS: usize = 14;

/// # Master Block Size.
pub(crate) const MASTER_BLOCK_SIZE: usize = 5_000_000;

/// # Master Block Size (Fast Mode).
///
/// Single-iteration, non-image runs use smaller slabs; the squeeze gets so
/// little per-pass refinement there that big slabs only hurt.
pub(crate) const MASTER_BLOCK_SIZE_FAST: usize = 1_000_000;

/// # Entropy-Mode Pruning Threshold (Bits).
///
/// Under the entropy oracle, a split that lands within this many bits of
/// the unsplit cost marks the block done rather than recursing further.
const ENTROPY_PRUNE_BITS: u32 = 200;



/// # A Fully Decided Block.
///
/// Workers plan; the writer replays. Keeping plans as data (rather than
/// bits) is what lets master blocks be planned out of order but written in
/// order.
pub(crate) enum EmitBlock {
	/// # Raw Bytes.
	Stored(usize, usize),

	/// # Fixed-Tree Block.
	Fixed(Lz77Store),

	/// # Dynamic-Tree Block.
	Dynamic(Lz77Store, u8, ArrayLL<u8>, ArrayD<u8>),
}



/// # Deflate.
///
/// Re-encode `input` as a raw DEFLATE stream using the full squeeze
/// pipeline. When `last` is set, the stream's final block carries BFINAL.
///
/// ## Errors
///
/// Returns an error if an internal sanity check trips; callers should fall
/// back to their original bytes.
pub fn deflate(options: &EncoderOptions, last: bool, input: &[u8])
-> Result<Vec<u8>, ContainerError> {
	tree::reset_lengths_cache();

	let mut out = BitWriter::new();

	// The empty stream still needs a (fixed, empty) block.
	if input.is_empty() {
		out.add_header(last, 1);
		out.add_bits(0, 7);
		return Ok(out.finish());
	}

	let master =
		if options.png || options.iterations > 1 { MASTER_BLOCK_SIZE }
		else { MASTER_BLOCK_SIZE_FAST };

	// Carve the input into master blocks. Each slab sees everything before
	// it (for the window) but only encodes its own range.
	let mut ranges: Vec<(usize, usize)> = Vec::new();
	let mut i = 0;
	while i < input.len() {
		let end = usize::min(i + master, input.len());
		ranges.push((i, end));
		i = end;
	}

	let plans = plan_masters(options, input, &ranges).map_err(ContainerError::from)?;

	// Write everything, in order.
	for (i, plan) in plans.iter().enumerate() {
		let (_, inend) = ranges[i];
		let last_master = i + 1 == plans.len();
		for (j, block) in plan.iter().enumerate() {
			let last_block = last && last_master && j + 1 == plan.len();
			emit_block(block, last_block, &input[..inend], &mut out)
				.map_err(ContainerError::from)?;
		}
	}

	Ok(out.finish())
}

/// # Plan All Master Blocks.
///
/// Sequential by default; with `threads > 1`, worker threads pull pending
/// block indices from a mutex-guarded counter and fill in the plans. Every
/// master block is self-contained, so the only shared state is that
/// counter and the (read-only) input.
fn plan_masters(
	options: &EncoderOptions,
	input: &[u8],
	ranges: &[(usize, usize)],
) -> Result<Vec<Vec<EmitBlock>>, MafliError> {
	let threads = usize::min(options.threads.max(1), ranges.len());
	if threads == 1 {
		let mut state = EngineState::with_options(options);
		let mut plans = Vec::with_capacity(ranges.len());
		for &(start, end) in ranges {
			plans.push(deflate_part(options, &mut state, &input[..end], start)?);
		}
		return Ok(plans);
	}

	// The dispatch index and result slots.
	let next: Mutex<usize> = Mutex::new(0);
	let slots: Vec<Mutex<Option<Result<Vec<EmitBlock>, MafliError>>>> =
		ranges.iter().map(|_| Mutex::new(None)).collect();

	std::thread::scope(|s| {
		for _ in 0..threads {
			s.spawn(|| {
				let mut state = EngineState::with_options(options);
				loop {
					// Take the next pending block, if any.
					let idx = {
						let mut guard = match next.lock() {
							Ok(g) => g,
							Err(_) => return,
						};
						let idx = *guard;
						if idx >= ranges.len() { return; }
						*guard += 1;
						idx
					};

					let (start, end) = ranges[idx];
					let plan = deflate_part(options, &mut state, &input[..end], start);
					if let Ok(mut slot) = slots[idx].lock() { *slot = Some(plan); }
				}
			});
		}
	});

	// Unwrap the slots back into an ordered list.
	let mut plans = Vec::with_capacity(ranges.len());
	for slot in slots {
		let plan = slot.into_inner()
			.map_err(|_| mafli_error!())?
			.ok_or(mafli_error!())??;
		plans.push(plan);
	}
	Ok(plans)
}

/// # Deflate One Master Block.
///
/// Finds split points, squeezes each piece, reconsiders the splits against
/// the refined token stream, and plans the final blocks.
pub(crate) fn deflate_part(
	options: &EncoderOptions,
	state: &mut EngineState,
	arr: &[u8],
	instart: usize,
) -> Result<Vec<EmitBlock>, MafliError> {
	// Stage one: a lazy pass picks better block boundaries than the full
	// squeeze would, unintuitively enough.
	let mut seed = Lz77Store::new();
	lazy(state, arr, instart, &mut seed, None)?;

	let byte_splits: Vec<usize> =
		if arr.len() - instart < options.no_split { Vec::new() }
		else {
			split_lz77(options, &seed)?.iter()
				.map(|&t| seed.position(t))
				.collect()
		};
	drop(seed);

	// Stage two: squeeze each segment, gluing the refined tokens together.
	let mut store = Lz77Store::new();
	let mut boundaries: Vec<usize> = Vec::new();
	let mut cost1 = 0_u32;
	let mut seg = Lz77Store::new();
	for i in 0..=byte_splits.len() {
		let start = if i == 0 { instart } else { byte_splits[i - 1] };
		let end = if i < byte_splits.len() { byte_splits[i] } else { arr.len() };
		debug_assert!(start <= end && end <= arr.len());

		seg.clear();
		lz77_optimal(options, state, &arr[..end], start, &mut seg)?;
		cost1 += calculate_block_size_auto(options, &seg, 0, seg.len())?;

		store.append(&seg);
		if i < byte_splits.len() { boundaries.push(store.len()); }
	}
	drop(seg);

	// Stage three: with the refined stream in hand, a second split pass
	// sometimes finds a better layout; keep whichever costs less.
	if 1 < boundaries.len() {
		let splits2 = split_lz77(options, &store)?;
		let mut cost2 = 0_u32;
		for i in 0..=splits2.len() {
			let start = if i == 0 { 0 } else { splits2[i - 1] };
			let end = if i < splits2.len() { splits2[i] } else { store.len() };
			cost2 += calculate_block_size_auto(options, &store, start, end)?;
		}
		if cost2 < cost1 { boundaries = splits2; }
	}

	// Stage four: decide each block's final form.
	let mut plan = Vec::with_capacity(boundaries.len() + 1);
	for i in 0..=boundaries.len() {
		let start = if i == 0 { 0 } else { boundaries[i - 1] };
		let end = if i < boundaries.len() { boundaries[i] } else { store.len() };
		plan.push(plan_block(options, state, &store, start, end, arr)?);
	}

	Ok(plan)
}



/// # Iterative Optimal LZ77.
///
/// Seeds a statistical model with a greedy pass, then repeats squeeze
/// passes, each feeding the next pass's model, keeping the best-costing
/// token stream seen. Stale runs get their stats shuffled to escape local
/// minima. A single-iteration run skips the loop (and, for image data,
/// applies the cost-model calibration instead).
fn lz77_optimal(
	options: &EncoderOptions,
	state: &mut EngineState,
	arr: &[u8],
	instart: usize,
	store: &mut Lz77Store,
) -> Result<(), MafliError> {
	if instart >= arr.len() { return Ok(()); }
	state.init_lmc(arr.len() - instart);

	// Greedy seeding pass.
	let mut scratch = Lz77Store::new();
	crate::lz77::greedy(state, arr, instart, &mut scratch, Some(instart))?;

	let mut stats = SymbolStats::new();
	stats.load_store(&scratch);
	stats.crunch();

	// The quick path: one squeeze, calibrated when the data is filtered
	// image rows.
	if options.iterations <= 1 {
		if options.png {
			stats.calibrate_for_png(arr.len() - instart);
		}
		return state.optimal_run(arr, instart, Some(&stats), store);
	}

	let mut ran = RanState::new();
	let mut best_stats = SymbolStats::new();
	let mut last_cost = 0_u32;
	let mut best_cost = u32::MAX;
	let mut last_ran = false;

	for i in 0..options.iterations {
		scratch.clear();
		state.optimal_run(arr, instart, Some(&stats), &mut scratch)?;

		let current_cost = calculate_block_size_dynamic(options, &scratch, 0, scratch.len())?;
		if current_cost < best_cost {
			store.replace(&scratch);
			best_stats = stats;
			best_cost = current_cost;
		}

		// Rebuild the model from this pass; once randomness has kicked in,
		// blend the previous pass back in for slower-but-better
		// convergence.
		stats.reload_store(&scratch, last_ran);
		stats.crunch();

		// Stale? Shuffle the best stats and try again from there.
		if i > 5 && current_cost == last_cost {
			stats = best_stats;
			stats.randomize(&mut ran);
			stats.crunch();
			last_ran = true;
		}

		last_cost = current_cost;
	}

	Ok(())
}



/// # Stored Size (Bits).
fn calculate_block_size_stored(store: &Lz77Store, lstart: usize, lend: usize)
-> Result<u32, MafliError> {
	let (instart, inend) = store.byte_range(lstart, lend)?;
	let blocksize = (inend - instart) as u32;

	// Each 65,535-byte chunk pays a 3-bit header, alignment, and the
	// LEN/NLEN words.
	let blocks = blocksize.div_ceil(65_535).max(1);
	Ok(blocks * 40 + blocksize * 8)
}

/// # Fixed-Tree Size (Bits).
fn calculate_block_size_fixed(store: &Lz77Store, lstart: usize, lend: usize) -> u32 {
	// Block header plus the end symbol.
	let mut size = 3 + u32::from(FIXED_TREE_LL[256]);
	for i in lstart..lend.min(store.len()) {
		let dist = store.dist(i);
		if dist == 0 {
			size += u32::from(FIXED_TREE_LL[store.litlen(i) as usize]);
		}
		else {
			let litlen = store.litlen(i) as usize;
			size += u32::from(FIXED_TREE_LL[LENGTH_SYMBOLS[litlen] as usize]);
			size += u32::from(LENGTH_SYMBOL_BITS[litlen]);
			size += u32::from(FIXED_TREE_D[DISTANCE_SYMBOLS[dist as usize] as usize]);
			size += u32::from(DISTANCE_BITS[DISTANCE_SYMBOLS[dist as usize] as usize]);
		}
	}
	size
}

/// # Dynamic Size (Bits).
fn calculate_block_size_dynamic(
	options: &EncoderOptions,
	store: &Lz77Store,
	lstart: usize,
	lend: usize,
) -> Result<u32, MafliError> {
	let (mut ll_counts, d_counts) = store.histogram(lstart, lend);
	ll_counts[256] = 1;
	let (_, size, _, _) = tree::get_dynamic_lengths(&ll_counts, &d_counts, options.advanced)?;
	Ok(size + 3)
}

/// # Best Size Among the Three Types (Bits).
fn calculate_block_size_auto(
	options: &EncoderOptions,
	store: &Lz77Store,
	lstart: usize,
	lend: usize,
) -> Result<u32, MafliError> {
	if lstart >= lend { return Ok(10); }

	let stored = calculate_block_size_stored(store, lstart, lend)?;

	// Big stores basically never win as fixed; skip the math.
	let fixed =
		if 1000 < lend - lstart { stored }
		else { calculate_block_size_fixed(store, lstart, lend) };

	let dynamic = calculate_block_size_dynamic(options, store, lstart, lend)?;

	Ok(stored.min(fixed).min(dynamic))
}

/// # Cost of a Histogram Under the Splitting Oracle.
///
/// The split search only sizes blocks as dynamic (or its Shannon
/// approximation), so a symbol histogram is all it needs. The header bits
/// ride along.
fn counts_cost(
	options: &EncoderOptions,
	ll_counts: &ArrayLL<u32>,
	d_counts: &ArrayD<u32>,
) -> Result<u32, MafliError> {
	let mut ll_counts = *ll_counts;
	ll_counts[256] = 1;
	let size =
		if options.entropy_split {
			tree::entropy_block_size(&ll_counts, d_counts)?
		}
		else {
			tree::get_dynamic_lengths(&ll_counts, d_counts, false)?.1
		};
	Ok(size + 3)
}

/// # Split Cost at a Boundary.
///
/// The sum of the two halves' costs. Only the left half is counted
/// directly; the right falls out of the whole range's (precomputed)
/// histogram by subtraction.
fn split_cost(
	options: &EncoderOptions,
	store: &Lz77Store,
	start: usize,
	mid: usize,
	ll_whole: &ArrayLL<u32>,
	d_whole: &ArrayD<u32>,
) -> Result<u32, MafliError> {
	let (ll_left, d_left) = store.histogram(start, mid);

	let mut ll_right = *ll_whole;
	for (r, l) in ll_right.iter_mut().zip(ll_left.iter()) {
		*r = r.checked_sub(*l).ok_or(mafli_error!())?;
	}
	let mut d_right = *d_whole;
	for (r, l) in d_right.iter_mut().zip(d_left.iter()) {
		*r = r.checked_sub(*l).ok_or(mafli_error!())?;
	}

	let a = counts_cost(options, &ll_left, &d_left)?;
	let b = counts_cost(options, &ll_right, &d_right)?;
	Ok(a + b)
}



/// # Find the Cheapest Split in a Range.
///
/// Probes `split_probes` evenly spaced interior points, narrowing around
/// the minimum until the window shrinks under the probe count or stops
/// improving. The returned position equals `lstart` when no probe beat the
/// unsplit whole.
fn find_minimum(
	options: &EncoderOptions,
	store: &Lz77Store,
	lstart: usize,
	lend: usize,
	done: &mut HashSet<usize, NoHash>,
) -> Result<usize, MafliError> {
	let probes = options.split_probes.clamp(3, 9);
	let split_start = lstart;

	// Count the whole range's symbols once; every probe derives its right
	// half from this by subtraction.
	let (ll_whole, d_whole) = store.histogram(split_start, lend);

	let mut start = lstart + 1;
	let mut end = lend;
	let startsize = end - start;

	let mut pos = lstart;
	let mut best = u32::MAX;
	let mut last_best = u32::MAX;

	let mut p = vec![0_usize; probes];
	loop {
		if end - start <= probes { break; }

		// Cheap-search bailout once the window is a sliver of the original.
		if probes == 3 && startsize > 600 && end - start <= startsize.wrapping_div(100) {
			break;
		}

		let mut best_i = 0;
		let mut round_best = u32::MAX;
		for (i, pp) in p.iter_mut().enumerate() {
			*pp = start + (i + 1) * ((end - start).wrapping_div(probes + 1));
			let cost =
				if *pp == pos { best }
				else { split_cost(options, store, split_start, *pp, &ll_whole, &d_whole)? };
			if cost < round_best {
				round_best = cost;
				best_i = i;
			}
		}

		// No improvement; we're done.
		if last_best < round_best { break; }

		// Narrow around the winner and go again.
		if 0 < best_i { start = p[best_i - 1]; }
		if best_i + 1 < probes { end = p[best_i + 1]; }

		pos = p[best_i];
		best = round_best;
		last_best = round_best;
	}

	// Does splitting actually beat the whole?
	let origcost = counts_cost(options, &ll_whole, &d_whole)?;
	if pos == lstart || origcost <= best {
		return Ok(lstart);
	}

	// Close calls under the entropy oracle aren't worth revisiting.
	if options.entropy_split && best + ENTROPY_PRUNE_BITS >= origcost {
		done.insert(pos);
	}

	Ok(pos)
}

/// # Find the Largest Splittable Block.
///
/// Picks the biggest not-yet-done range between existing split points, so a
/// capped number of blocks still spreads evenly. Returns `false` when
/// nothing usable remains.
fn find_largest_splittable_block(
	lz77size: usize,
	done: &HashSet<usize, NoHash>,
	splitpoints: &[usize],
	lstart: &mut usize,
	lend: &mut usize,
) -> bool {
	let mut best = 0;
	for i in 0..=splitpoints.len() {
		let start =
			if i == 0 { 0 }
			else { splitpoints[i - 1] };
		let end =
			if i < splitpoints.len() { splitpoints[i] }
			else { lz77size - 1 };

		if best < end - start && ! done.contains(&start) {
			*lstart = start;
			*lend = end;
			best = end - start;
		}
	}
	MINIMUM_SPLIT_DISTANCE <= best
}

/// # Split a Token Stream.
///
/// Returns sorted token indices at which new blocks should start.
fn split_lz77(options: &EncoderOptions, store: &Lz77Store)
-> Result<Vec<usize>, MafliError> {
	// This doesn't work on tiny stores.
	if store.len() < options.no_split_lz.max(MINIMUM_SPLIT_DISTANCE) {
		return Ok(Vec::new());
	}

	let mut done: HashSet<usize, NoHash> = HashSet::with_hasher(NoHash::default());
	let mut splits: Vec<usize> = Vec::new();
	let mut lstart = 0;
	let mut lend = store.len();

	loop {
		let llpos = find_minimum(options, store, lstart, lend, &mut done)?;

		if llpos <= lstart + 1 || llpos >= lend {
			// This range can't usefully split; never retry it.
			done.insert(lstart);
		}
		else {
			// Record it, keeping the list sorted.
			let idx = splits.partition_point(|&s| s < llpos);
			splits.insert(idx, llpos);
			if splits.len() == MAX_SPLIT_POINTS { break; }
		}

		if ! find_largest_splittable_block(store.len(), &done, &splits, &mut lstart, &mut lend) {
			break;
		}
		if lend - lstart < options.no_split_lz.max(MINIMUM_SPLIT_DISTANCE) {
			break;
		}
	}

	Ok(splits)
}



/// # Decide a Block's Final Form.
///
/// Sizes the three block types, runs the expensive fixed-tree retry when it
/// might pay, optionally trades short matches back into literals, and
/// returns the plan.
fn plan_block(
	options: &EncoderOptions,
	state: &mut EngineState,
	store: &Lz77Store,
	lstart: usize,
	lend: usize,
	arr: &[u8],
) -> Result<EmitBlock, MafliError> {
	// Empty ranges become empty fixed blocks.
	if lstart >= lend {
		return Ok(EmitBlock::Fixed(Lz77Store::new()));
	}

	let (instart, inend) = store.byte_range(lstart, lend)?;

	let mut block = Lz77Store::new();
	for i in lstart..lend {
		block.push(store.litlen(i), store.dist(i), store.position(i))?;
	}

	let stored_cost = calculate_block_size_stored(store, lstart, lend)?;
	let fixed_cost = calculate_block_size_fixed(store, lstart, lend);

	let (mut ll_counts, d_counts) = store.histogram(lstart, lend);
	ll_counts[256] = 1;
	let (mut variant, dyn_size, mut ll_lengths, mut d_lengths) =
		tree::get_dynamic_lengths(&ll_counts, &d_counts, options.advanced)?;
	let mut dynamic_cost = dyn_size + 3;

	// A dedicated fixed-tree squeeze is only worth trying when the block is
	// small or the cheap fixed estimate is already nipping at dynamic's
	// heels.
	if lend - lstart < 1000 || fixed_cost * 10 <= dynamic_cost * 11 {
		state.init_lmc(inend - instart);
		let mut fixed_store = Lz77Store::new();
		state.optimal_run(&arr[..inend], instart, None, &mut fixed_store)?;
		let expensive_cost = calculate_block_size_fixed(&fixed_store, 0, fixed_store.len());

		if expensive_cost < dynamic_cost && expensive_cost <= stored_cost {
			return Ok(EmitBlock::Fixed(fixed_store));
		}
	}

	// Trade short, expensive matches back into literals when the current
	// header prices say that's cheaper.
	if options.replace_codes > 0 && dynamic_cost <= stored_cost && dynamic_cost <= fixed_cost {
		for _ in 0..options.replace_codes {
			if ! replace_bad_codes(&mut block, arr, &ll_lengths, &d_lengths)? { break; }

			// Re-derive the codes for the rewritten stream.
			let (mut ll2, d2) = block.histogram(0, block.len());
			ll2[256] = 1;
			let (v2, s2, l2, dl2) = tree::get_dynamic_lengths(&ll2, &d2, options.advanced)?;
			variant = v2;
			dynamic_cost = s2 + 3;
			ll_lengths = l2;
			d_lengths = dl2;
		}
	}

	if stored_cost < fixed_cost && stored_cost < dynamic_cost {
		Ok(EmitBlock::Stored(instart, inend))
	}
	else if fixed_cost < dynamic_cost {
		Ok(EmitBlock::Fixed(block))
	}
	else {
		Ok(EmitBlock::Dynamic(block, variant, ll_lengths, d_lengths))
	}
}

/// # Expand Costly Short Matches.
///
/// For each back-reference of length three to seven, compares its coded
/// cost against the literals it stands for under the current code lengths;
/// cheaper literals replace the match in place. The rewrite never changes
/// the decoded bytes. Returns whether anything changed.
fn replace_bad_codes(
	store: &mut Lz77Store,
	arr: &[u8],
	ll_lengths: &ArrayLL<u8>,
	d_lengths: &ArrayD<u8>,
) -> Result<bool, MafliError> {
	let mut out = Lz77Store::new();
	let mut changed = false;

	for i in 0..store.len() {
		let litlen = store.litlen(i);
		let dist = store.dist(i);
		let pos = store.position(i);
		let length = usize::from(litlen);

		if dist != 0 && (MIN_MATCH..=7).contains(&length) {
			// Price the literals. A missing code anywhere means the
			// literals aren't expressible; bail on this token.
			let mut lit_price = 0_u32;
			let mut expressible = true;
			for j in 0..length {
				let b = usize::from(arr[pos + j]);
				if ll_lengths[b] == 0 {
					expressible = false;
					break;
				}
				lit_price += u32::from(ll_lengths[b]);
			}

			if expressible {
				let lsym = LENGTH_SYMBOLS[length] as usize;
				let dsym = DISTANCE_SYMBOLS[usize::from(dist)] as usize;
				let match_price = u32::from(ll_lengths[lsym])
					+ u32::from(LENGTH_SYMBOL_BITS[length])
					+ u32::from(DISTANCE_BITS[dsym])
					+ u32::from(d_lengths[dsym]);

				if lit_price < match_price {
					for j in 0..length {
						out.push(u16::from(arr[pos + j]), 0, pos + j)?;
					}
					changed = true;
					continue;
				}
			}
		}

		out.push(litlen, dist, pos)?;
	}

	if changed { store.replace(&out); }
	Ok(changed)
}



/// # Write a Planned Block.
fn emit_block(
	block: &EmitBlock,
	last: bool,
	arr: &[u8],
	out: &mut BitWriter,
) -> Result<(), MafliError> {
	match block {
		EmitBlock::Stored(instart, inend) => {
			let data = arr.get(*instart..*inend).ok_or(mafli_error!())?;
			out.add_stored_block(last, data);
			Ok(())
		},
		EmitBlock::Fixed(store) => {
			out.add_header(last, 1);
			let ll_symbols = canonical_symbols(&FIXED_TREE_LL);
			let d_symbols = canonical_symbols(&FIXED_TREE_D);
			emit_tokens(store, &ll_symbols, &FIXED_TREE_LL, &d_symbols, &FIXED_TREE_D, out)
		},
		EmitBlock::Dynamic(store, variant, ll_lengths, d_lengths) => {
			out.add_header(last, 2);
			tree::encode_tree(ll_lengths, d_lengths, *variant, out)?;
			let ll_symbols = canonical_symbols(ll_lengths);
			let d_symbols = canonical_symbols(d_lengths);
			emit_tokens(store, &ll_symbols, ll_lengths, &d_symbols, d_lengths, out)
		},
	}
}

/// # Write a Block's Tokens and End Code.
fn emit_tokens(
	store: &Lz77Store,
	ll_symbols: &ArrayLL<u32>,
	ll_lengths: &ArrayLL<u8>,
	d_symbols: &ArrayD<u32>,
	d_lengths: &ArrayD<u8>,
	out: &mut BitWriter,
) -> Result<(), MafliError> {
	for i in 0..store.len() {
		let litlen = usize::from(store.litlen(i));
		let dist = store.dist(i);

		if dist == 0 {
			if litlen >= 256 || ll_lengths[litlen] == 0 { return Err(mafli_error!()); }
			out.add_huffman_bits(ll_symbols[litlen], u32::from(ll_lengths[litlen]));
		}
		else {
			let lsym = LENGTH_SYMBOLS[litlen] as usize;
			let dsym = DISTANCE_SYMBOLS[usize::from(dist)] as usize;
			if ll_lengths[lsym] == 0 || d_lengths[dsym] == 0 { return Err(mafli_error!()); }

			out.add_huffman_bits(ll_symbols[lsym], u32::from(ll_lengths[lsym]));
			out.add_bits(
				u32::from(LENGTH_SYMBOL_VALUES[litlen]),
				u32::from(LENGTH_SYMBOL_BITS[litlen]),
			);
			out.add_huffman_bits(d_symbols[dsym], u32::from(d_lengths[dsym]));
			out.add_bits(
				u32::from(DISTANCE_VALUES[usize::from(dist)]),
				u32::from(DISTANCE_BITS[dsym]),
			);
		}
	}

	// Finish up with the end symbol.
	if ll_lengths[256] == 0 { return Err(mafli_error!()); }
	out.add_huffman_bits(ll_symbols[256], u32::from(ll_lengths[256]));
	Ok(())
}



#[cfg(test)]
mod tests {
	use super::*;

	fn opts(level: u8) -> EncoderOptions { EncoderOptions::from_level(level) }

	/// # Deflate + Inflate Round Trip.
	fn roundtrip(options: &EncoderOptions, data: &[u8]) -> Vec<u8> {
		let enc = deflate(options, true, data).expect("deflate failed");
		if ! data.is_empty() {
			assert!(
				enc.len() <= data.len() + data.len() / 100 + 64,
				"deflate ballooned: {} -> {}", data.len(), enc.len(),
			);
		}
		miniz_oxide::inflate::decompress_to_vec(&enc).expect("inflate failed")
	}

	#[test]
	fn t_deflate_empty() {
		assert!(roundtrip(&opts(3), &[]).is_empty());
	}

	#[test]
	fn t_deflate_tiny() {
		// Ten distinct bytes: a single stored or fixed block, well under
		// thirty bytes of output.
		let data = [0_u8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
		let options = opts(3);
		let enc = deflate(&options, true, &data).expect("deflate failed");
		assert!(enc.len() < 30);
		assert_eq!(
			miniz_oxide::inflate::decompress_to_vec(&enc).unwrap(),
			data,
		);
	}

	#[test]
	fn t_deflate_run() {
		let data = vec![0xAA_u8; 258];
		assert_eq!(roundtrip(&opts(3), &data), data);

		let data = vec![0_u8; 1000];
		assert_eq!(roundtrip(&opts(3), &data), data);
	}

	#[test]
	fn t_deflate_text() {
		let mut data = Vec::new();
		for i in 0_u32..200 {
			data.extend_from_slice(b"It was the best of times, it was the worst of times. ");
			data.push((i % 7) as u8 + b'0');
		}
		for level in [1, 3, 6, 9] {
			assert_eq!(roundtrip(&opts(level), &data), data);
		}
	}

	#[test]
	fn t_deflate_incompressible() {
		// A pseudo-random mess should fall back to (nearly) stored size.
		let mut state: u32 = 0x2545_F491;
		let data: Vec<u8> = (0..4096).map(|_| {
			state ^= state << 13;
			state ^= state >> 17;
			state ^= state << 5;
			(state >> 24) as u8
		}).collect();
		assert_eq!(roundtrip(&opts(3), &data), data);
	}

	#[test]
	fn t_deflate_deterministic() {
		let mut data = Vec::new();
		for i in 0_u32..500 {
			data.extend_from_slice(&i.to_le_bytes());
			data.extend_from_slice(b"padding-padding");
		}
		let options = opts(4);
		let a = deflate(&options, true, &data).unwrap();
		let b = deflate(&options, true, &data).unwrap();
		assert_eq!(a, b, "same input and options must give identical bits");
	}

	#[test]
	fn t_split_idempotent() {
		// Splitting an already-chosen sub-range again must not find new
		// points within it (same or fewer cuts).
		let mut data = Vec::new();
		data.extend(std::iter::repeat(b'a').take(4000));
		data.extend((0_u32..4000).map(|i| (i % 256) as u8));
		data.extend(std::iter::repeat(b'z').take(4000));

		let options = opts(3);
		let mut state = EngineState::with_options(&options);
		let mut seed = Lz77Store::new();
		lazy(&mut state, &data, 0, &mut seed, None).unwrap();

		let first = split_lz77(&options, &seed).unwrap();
		if first.len() >= 2 {
			// Rebuild a store spanning just the first split range and
			// re-split it.
			let mut sub = Lz77Store::new();
			for i in first[0]..first[1] {
				sub.push(seed.litlen(i), seed.dist(i), seed.position(i)).unwrap();
			}
			let again = split_lz77(&options, &sub).unwrap();
			assert!(again.len() <= first.len());
		}
	}

	#[test]
	fn t_emitted_bits_match_prediction() {
		// The cost model's block sizes must equal the bits actually
		// written, for both fixed and dynamic trees.
		let mut data = Vec::new();
		for i in 0_u32..300 {
			data.extend_from_slice(b"abcabcabx");
			data.push((i % 11) as u8);
		}
		let options = opts(3);
		let mut state = EngineState::with_options(&options);
		let mut store = Lz77Store::new();
		lazy(&mut state, &data, 0, &mut store, None).unwrap();

		// Dynamic.
		let (mut ll_counts, d_counts) = store.histogram(0, store.len());
		ll_counts[256] = 1;
		let (variant, size, ll, d) =
			tree::get_dynamic_lengths(&ll_counts, &d_counts, false).unwrap();
		let mut w = BitWriter::new();
		emit_block(
			&EmitBlock::Dynamic(store.clone(), variant, ll, d),
			true,
			&data,
			&mut w,
		).unwrap();
		assert_eq!(w.len_bits(), size as usize + 3, "dynamic prediction drifted");

		// Fixed.
		let predicted = calculate_block_size_fixed(&store, 0, store.len());
		let mut w = BitWriter::new();
		emit_block(&EmitBlock::Fixed(store.clone()), true, &data, &mut w).unwrap();
		assert_eq!(w.len_bits(), predicted as usize, "fixed prediction drifted");
	}

	#[test]
	fn t_replace_bad_codes_equivalence() {
		// The rewrite must not change the decoded bytes.
		let data: Vec<u8> = b"abcdXabcdYabcdZabcd".to_vec();
		let options = opts(3);
		let mut state = EngineState::with_options(&options);
		let mut store = Lz77Store::new();
		lazy(&mut state, &data, 0, &mut store, None).unwrap();
		let before = crate::lz77::tests::decode(&store);

		// Absurd code lengths that make every match look expensive.
		let mut ll = [4_u8; crate::symbols::NUM_LL];
		for l in ll.iter_mut().skip(257) { *l = 15; }
		let d = [15_u8; crate::symbols::NUM_D];
		let changed = replace_bad_codes(&mut store, &data, &ll, &d).unwrap();

		assert!(changed, "the rigged prices should force expansion");
		assert_eq!(crate::lz77::tests::decode(&store), before);
	}
}
