/*!
# Mafli: PNG Filter Strategies.

Per-scanline filter selection. The cheap strategies score rows with local
heuristics (signed sums, byte entropy, distinct bigrams); the expensive ones
actually deflate their candidates; and the genetic search breeds whole
filter vectors against the compressed size, stopping on staleness or ^C.
*/

use std::sync::atomic::Ordering::Relaxed;
use crate::png::raw::{
	filter_row,
	paeth,
};



/// # Genetic Population Size.
const POPULATION_SIZE: usize = 19;

/// # Generations Without Improvement Before Giving Up.
const STALE_GENERATIONS: u32 = 500;

/// # Deflate Level for Per-Row (Brute) Scoring.
const SCORE_LEVEL_BRUTE: u8 = 3;

/// # Dictionary Window Carried Between Incremental Scores.
const SCORE_WINDOW: usize = 32_768;



#[derive(Debug, Clone, PartialEq, Eq)]
/// # Filter Strategy.
pub(crate) enum FilterStrategy {
	/// # One Filter Type Everywhere.
	Fixed(u8),

	/// # Minimum Signed Sum.
	MinSum,

	/// # Minimum Byte Entropy.
	Entropy,

	/// # Fewest Distinct Bytes.
	DistinctBytes,

	/// # Most Distinct Bigrams.
	DistinctBigrams,

	/// # Caller-Supplied Types (One Per Row).
	Predefined(Vec<u8>),

	/// # Per-Row Deflate Trials.
	BruteForce,

	/// # Streaming Deflate Trials.
	Incremental,

	/// # Streaming Deflate Trials (Heavier Tuning).
	Incremental2,

	/// # Streaming Deflate Trials (Fastest Deflate).
	Incremental3,

	/// # Evolutionary Search.
	Genetic,

	/// # Best of the Three Incremental Variants.
	AllCheap,
}



/// # Filter Machinery for One Image.
pub(crate) struct Filterer<'a> {
	/// # Raw (Unfiltered) Scanlines.
	rows: &'a [u8],

	/// # Bytes Per Scanline.
	linebytes: usize,

	/// # Row Count.
	h: usize,

	/// # Per-Pixel Byte Stride.
	bytewidth: usize,

	/// # Rewrite Transparent Pixels Per Trial?
	clean: bool,
}

impl<'a> Filterer<'a> {
	/// # New.
	///
	/// The clean-alpha rewrite only makes sense over RGBA-8 rows; it is
	/// quietly dropped for anything else.
	pub(crate) const fn new(
		rows: &'a [u8],
		linebytes: usize,
		h: usize,
		bytewidth: usize,
		clean: bool,
	) -> Self {
		Self {
			rows,
			linebytes,
			h,
			bytewidth,
			clean: clean && bytewidth == 4,
		}
	}

	/// # Run a Strategy.
	///
	/// Returns the complete filtered stream: each row prefixed by its
	/// filter type byte.
	pub(crate) fn run(&self, strategy: &FilterStrategy, quiet: bool) -> Vec<u8> {
		match strategy {
			FilterStrategy::Fixed(t) => {
				let types = vec![t.min(&4).to_owned(); self.h];
				self.filter_with_types(&types, false)
			},
			FilterStrategy::Predefined(types) => self.filter_with_types(types, false),
			FilterStrategy::MinSum |
			FilterStrategy::Entropy |
			FilterStrategy::DistinctBytes |
			FilterStrategy::DistinctBigrams => self.heuristic(strategy),
			FilterStrategy::BruteForce => self.brute(),
			FilterStrategy::Incremental => self.incremental(2),
			FilterStrategy::Incremental2 => self.incremental(4),
			FilterStrategy::Incremental3 => self.incremental(1),
			FilterStrategy::Genetic => self.genetic(quiet),
			FilterStrategy::AllCheap => self.all_cheap(),
		}
	}

	/// # Row Slice.
	fn row(&self, y: usize) -> &[u8] {
		&self.rows[y * self.linebytes..(y + 1) * self.linebytes]
	}

	/// # Apply a Known Type Vector.
	///
	/// When `clean` is requested (and enabled), each row's transparent
	/// pixels are rewritten to its filter's predictions first, zeroing the
	/// filtered bytes without touching any visible pixel.
	fn filter_with_types(&self, types: &[u8], clean: bool) -> Vec<u8> {
		let clean = clean && self.clean;
		let mut out = vec![0_u8; (self.linebytes + 1) * self.h];
		let mut prev_clean: Option<Vec<u8>> = None;

		for y in 0..self.h {
			let ftype = types.get(y).copied().unwrap_or(0).min(4);
			let start = y * (self.linebytes + 1);
			out[start] = ftype;

			if clean {
				let mut cur = self.row(y).to_vec();
				clean_row(&mut cur, prev_clean.as_deref(), ftype);
				filter_row(
					&mut out[start + 1..start + 1 + self.linebytes],
					&cur,
					prev_clean.as_deref(),
					self.bytewidth,
					ftype,
				);
				prev_clean = Some(cur);
			}
			else {
				let prev = if y == 0 { None } else { Some(self.row(y - 1)) };
				filter_row(
					&mut out[start + 1..start + 1 + self.linebytes],
					self.row(y),
					prev,
					self.bytewidth,
					ftype,
				);
			}
		}

		out
	}

	/// # Five Attempts for One Row.
	///
	/// Fills `attempts` with the filtered representations of row `y` under
	/// each filter type, honoring the clean rewrite against the (cleaned)
	/// previous row.
	fn attempt_row(
		&self,
		y: usize,
		prev_clean: Option<&[u8]>,
		attempts: &mut [Vec<u8>; 5],
	) {
		for (t, slot) in attempts.iter_mut().enumerate() {
			let ftype = t as u8;
			slot.resize(self.linebytes, 0);

			if self.clean {
				let mut cur = self.row(y).to_vec();
				clean_row(&mut cur, prev_clean, ftype);
				filter_row(slot, &cur, prev_clean, self.bytewidth, ftype);
			}
			else {
				let prev =
					if y == 0 { None }
					else { Some(self.row(y - 1)) };
				filter_row(slot, self.row(y), prev, self.bytewidth, ftype);
			}
		}
	}

	/// # Commit a Chosen Row.
	///
	/// Copies the winning attempt into the output and rolls the cleaned
	/// previous-row state forward.
	fn commit_row(
		&self,
		y: usize,
		ftype: u8,
		attempt: &[u8],
		out: &mut [u8],
		prev_clean: &mut Option<Vec<u8>>,
	) {
		let start = y * (self.linebytes + 1);
		out[start] = ftype;
		out[start + 1..start + 1 + self.linebytes].copy_from_slice(attempt);

		if self.clean {
			let mut cur = self.row(y).to_vec();
			clean_row(&mut cur, prev_clean.as_deref(), ftype);
			*prev_clean = Some(cur);
		}
	}

	/// # Heuristic Selection.
	fn heuristic(&self, strategy: &FilterStrategy) -> Vec<u8> {
		let mut out = vec![0_u8; (self.linebytes + 1) * self.h];
		let mut prev_clean: Option<Vec<u8>> = None;
		let mut attempts: [Vec<u8>; 5] = std::array::from_fn(|_| Vec::new());

		for y in 0..self.h {
			self.attempt_row(y, prev_clean.as_deref(), &mut attempts);

			let mut best_type = 0_u8;
			let mut smallest = 0_u64;
			for (t, attempt) in attempts.iter().enumerate() {
				let sum = match strategy {
					FilterStrategy::MinSum => {
						// Bytes act as signed differences for every filter
						// but None.
						if t == 0 {
							attempt.iter().copied().map(u64::from).sum()
						}
						else {
							attempt.iter()
								.copied()
								.map(|s| if s < 128 { u64::from(s) } else { 255 - u64::from(s) })
								.sum()
						}
					},
					FilterStrategy::DistinctBigrams => {
						let mut count = vec![false; 65_536];
						for w in attempt.windows(2) {
							count[usize::from(w[0]) << 8 | usize::from(w[1])] = true;
						}
						count[t] = true; // The filter byte rides along.
						count.iter().filter(|&&b| b).count() as u64
					},
					FilterStrategy::DistinctBytes => {
						let mut count = [false; 256];
						for &b in attempt { count[usize::from(b)] = true; }
						count[t] = true;
						count.iter().filter(|&&b| b).count() as u64
					},
					// Entropy.
					_ => {
						let mut count = [0_u64; 256];
						for &b in attempt { count[usize::from(b)] += 1; }
						count[t] += 1;
						count.iter().copied().map(ilog2i).sum()
					},
				};

				// Bigrams and the concentration score hunt the maximum;
				// the others the minimum.
				let better =
					if matches!(strategy, FilterStrategy::DistinctBigrams | FilterStrategy::Entropy) {
						sum > smallest
					}
					else { sum < smallest };
				if t == 0 || better {
					best_type = t as u8;
					smallest = sum;
				}
			}

			let chosen = std::mem::take(&mut attempts[usize::from(best_type)]);
			self.commit_row(y, best_type, &chosen, &mut out, &mut prev_clean);
			attempts[usize::from(best_type)] = chosen;
		}

		out
	}

	/// # Brute Force.
	///
	/// Deflates each row's five candidates on their own, keeping the
	/// smallest.
	fn brute(&self) -> Vec<u8> {
		let mut out = vec![0_u8; (self.linebytes + 1) * self.h];
		let mut prev_clean: Option<Vec<u8>> = None;
		let mut attempts: [Vec<u8>; 5] = std::array::from_fn(|_| Vec::new());

		for y in 0..self.h {
			self.attempt_row(y, prev_clean.as_deref(), &mut attempts);

			let mut best_type = 0_u8;
			let mut smallest = usize::MAX;
			for (t, attempt) in attempts.iter().enumerate() {
				let size = miniz_oxide::deflate::compress_to_vec(attempt, SCORE_LEVEL_BRUTE).len();
				if t == 0 || size < smallest {
					best_type = t as u8;
					smallest = size;
				}
			}

			let chosen = std::mem::take(&mut attempts[usize::from(best_type)]);
			self.commit_row(y, best_type, &chosen, &mut out, &mut prev_clean);
			attempts[usize::from(best_type)] = chosen;
		}

		out
	}

	/// # Incremental Brute Force.
	///
	/// Like brute force, but each candidate is scored in the context of
	/// everything already chosen (the trailing window of it, anyway), so
	/// cross-row back-references count for something.
	fn incremental(&self, level: u8) -> Vec<u8> {
		let mut out = vec![0_u8; (self.linebytes + 1) * self.h];
		let mut prev_clean: Option<Vec<u8>> = None;
		let mut attempts: [Vec<u8>; 5] = std::array::from_fn(|_| Vec::new());

		// The committed stream so far; candidates are appended to its tail
		// for scoring.
		let mut acc: Vec<u8> = Vec::new();
		let mut scratch: Vec<u8> = Vec::new();

		for y in 0..self.h {
			self.attempt_row(y, prev_clean.as_deref(), &mut attempts);

			let window_from = acc.len().saturating_sub(SCORE_WINDOW);
			let mut best_type = 4_u8;
			let mut smallest = usize::MAX;

			// Type zero is the most common winner; trying it last means the
			// copy below is usually already in place.
			for t in (0..5_usize).rev() {
				scratch.clear();
				scratch.extend_from_slice(&acc[window_from..]);
				scratch.push(t as u8);
				scratch.extend_from_slice(&attempts[t]);

				let size = miniz_oxide::deflate::compress_to_vec(&scratch, level).len();
				if t == 4 || size < smallest {
					best_type = t as u8;
					smallest = size;
				}
			}

			let chosen = std::mem::take(&mut attempts[usize::from(best_type)]);
			acc.push(best_type);
			acc.extend_from_slice(&chosen);
			self.commit_row(y, best_type, &chosen, &mut out, &mut prev_clean);
			attempts[usize::from(best_type)] = chosen;
		}

		out
	}

	/// # Best of the Cheap Streaming Variants.
	fn all_cheap(&self) -> Vec<u8> {
		let mut best: Option<(usize, Vec<u8>)> = None;
		for level in [2_u8, 4, 1] {
			let candidate = self.incremental(level);
			let size = miniz_oxide::deflate::compress_to_vec(&candidate, SCORE_LEVEL_BRUTE).len();
			if best.as_ref().is_none_or(|(s, _)| size < *s) {
				best = Some((size, candidate));
			}
		}
		best.map(|(_, c)| c).unwrap_or_default()
	}

	/// # Score a Whole Type Vector.
	fn score_types(&self, types: &[u8]) -> (usize, Vec<u8>) {
		let filtered = self.filter_with_types(types, true);
		let size = miniz_oxide::deflate::compress_to_vec(&filtered, SCORE_LEVEL_BRUTE).len();
		(size, filtered)
	}

	/// # Genetic Search.
	///
	/// A population of filter vectors evolves against the compressed size:
	/// tournament selection (always two contenders), two-point crossover at
	/// 0.9 probability, one-percent per-row mutation. The loop ends after
	/// `STALE_GENERATIONS` without improvement, or as soon as a ^C is
	/// observed; either way, the best vector seen wins.
	fn genetic(&self, quiet: bool) -> Vec<u8> {
		if ! quiet {
			eprintln!(
				"Genetic filtering enabled; this may take a long while. It stops after\n\
				{STALE_GENERATIONS} generations without progress, or on CTRL+C."
			);
		}

		let h = self.h;
		let mut rng = GeneRng::new();
		let mut population = vec![0_u8; h * POPULATION_SIZE];
		for g in &mut population { *g = (rng.next() % 5) as u8; }

		let mut sizes = [0_usize; POPULATION_SIZE];
		let mut ranking: [usize; POPULATION_SIZE] = std::array::from_fn(|i| i);
		let mut total_size = 0_usize;
		for g in 0..POPULATION_SIZE {
			let (size, _) = self.score_types(&population[g * h..(g + 1) * h]);
			sizes[g] = size;
			total_size += size;
		}

		let mut best_size = usize::MAX;
		let mut best_genome: Vec<u8> = population[..h].to_vec();
		let mut stale = 0_u32;
		let mut generation = 0_u32;

		while stale < STALE_GENERATIONS && ! crate::CANCELLED.load(Relaxed) {
			generation += 1;

			// Re-sort the rankings (insertion sort; it's tiny and nearly
			// sorted already).
			for i in 1..POPULATION_SIZE {
				let t = ranking[i];
				let mut j = i;
				while j > 0 && sizes[ranking[j - 1]] > sizes[t] {
					ranking[j] = ranking[j - 1];
					j -= 1;
				}
				ranking[j] = t;
			}

			if sizes[ranking[0]] < best_size {
				best_size = sizes[ranking[0]];
				best_genome.copy_from_slice(&population[ranking[0] * h..(ranking[0] + 1) * h]);
				stale = 0;
				if ! quiet {
					eprintln!("Generation {generation}: {best_size} bytes");
				}
			}
			else { stale += 1; }

			// Three children per generation, replacing the three worst.
			for c in 0..3 {
				let p1 = self.select_parent(&ranking, &sizes, total_size, &mut rng);
				let p2 = self.select_parent(&ranking, &sizes, total_size, &mut rng);
				let child_idx = ranking[POPULATION_SIZE - 1 - c];

				let parent1: Vec<u8> = population[p1 * h..(p1 + 1) * h].to_vec();
				let parent2: Vec<u8> = population[p2 * h..(p2 + 1) * h].to_vec();
				let child = &mut population[child_idx * h..(child_idx + 1) * h];

				// Two-point crossover, usually.
				if rng.decimal() < 0.9 {
					let mut x1 = (rng.next() % h as u64) as usize;
					let mut x2 = (rng.next() % h as u64) as usize;
					if x1 > x2 { std::mem::swap(&mut x1, &mut x2); }

					child[..x1].copy_from_slice(&parent1[..x1]);
					child[x1..x2].copy_from_slice(&parent2[x1..x2]);
					child[x2..].copy_from_slice(&parent1[x2..]);
				}
				else if rng.next() & 1 == 1 { child.copy_from_slice(&parent1); }
				else { child.copy_from_slice(&parent2); }

				// Mutation.
				for row in child.iter_mut() {
					if rng.decimal() < 0.01 { *row = (rng.next() % 5) as u8; }
				}

				// Evaluate the new genome.
				let (size, _) = self.score_types(&population[child_idx * h..(child_idx + 1) * h]);
				total_size -= sizes[child_idx];
				total_size += size;
				sizes[child_idx] = size;
			}
		}

		self.filter_with_types(&best_genome, true)
	}

	/// # Tournament Selection.
	///
	/// Two size-weighted spins of the wheel; the smaller threshold wins, so
	/// the pick leans toward better-ranked genomes.
	fn select_parent(
		&self,
		ranking: &[usize; POPULATION_SIZE],
		sizes: &[usize; POPULATION_SIZE],
		total_size: usize,
		rng: &mut GeneRng,
	) -> usize {
		let mut threshold = usize::MAX;
		for _ in 0..2 {
			let spin = (rng.decimal() * total_size as f64) as usize;
			threshold = threshold.min(spin);
		}

		let mut sum = 0_usize;
		for &r in ranking {
			sum += sizes[r];
			if sum > threshold { return r; }
		}
		ranking[POPULATION_SIZE - 1]
	}
}



/// # Rewrite One Row's Transparent Pixels.
///
/// Sets the RGB channels of fully-transparent pixels to the given filter's
/// prediction, so the filtered bytes come out zero. Visible pixels (and the
/// alpha channel itself) are untouched, so the decode is unchanged
/// everywhere it matters.
fn clean_row(cur: &mut [u8], prev: Option<&[u8]>, ftype: u8) {
	let pixels = cur.len() / 4;
	for p in 0..pixels {
		if cur[p * 4 + 3] != 0 { continue; }
		for c in 0..3 {
			let x = p * 4 + c;
			let a = if p > 0 { cur[x - 4] } else { 0 };
			let b = prev.map_or(0, |pv| pv[x]);
			let d = if p > 0 { prev.map_or(0, |pv| pv[x - 4]) } else { 0 };
			cur[x] = match ftype {
				1 => a,
				2 => b,
				3 => (((u16::from(a)) + u16::from(b)) >> 1) as u8,
				4 => paeth(a, b, d),
				_ => 0,
			};
		}
	}
}

/// # Integer Approximation of `i · log2(i)`.
fn ilog2i(i: u64) -> u64 {
	if i == 0 { return 0; }
	let l = u64::from(i.ilog2());
	// The linear term approximates the missing fractional part times i.
	i * l + ((i - (1 << l)) << 1)
}



/// # Genetic RNG.
///
/// xorshift128+, deterministically seeded so runs are reproducible.
struct GeneRng([u64; 2]);

impl GeneRng {
	/// # New.
	const fn new() -> Self {
		Self([0x9E37_79B9_7F4A_7C15, 0xBF58_476D_1CE4_E5B9])
	}

	/// # Next Value.
	fn next(&mut self) -> u64 {
		let mut x = self.0[0];
		let y = self.0[1];
		self.0[0] = y;
		x ^= x << 23;
		self.0[1] = x ^ y ^ (x >> 17) ^ (y >> 26);
		self.0[1].wrapping_add(y)
	}

	/// # Uniform Decimal in `[0, 1)`.
	fn decimal(&mut self) -> f64 {
		(self.next() >> 11) as f64 / (1_u64 << 53) as f64
	}
}



#[cfg(test)]
mod tests {
	use super::*;
	use crate::png::raw::unfilter_image;
	use crate::png::chunks::Ihdr;

	/// # Gray Gradient Rows: Each Row `r, r+1, r+2, r+3`.
	fn gradient_rows() -> Vec<u8> {
		let mut out = Vec::new();
		for r in [10_u8, 50, 90, 130] {
			out.extend_from_slice(&[r, r + 1, r + 2, r + 3]);
		}
		out
	}

	fn check_roundtrip(rows: &[u8], filtered: &[u8], w: u32, h: u32, bpp: u8) {
		let ihdr = Ihdr {
			width: w,
			height: h,
			bit_depth: bpp,
			color_type: 0,
			interlace: 0,
		};
		let (back, _) = unfilter_image(filtered, ihdr).expect("unfilter failed");
		assert_eq!(back, rows, "filtered stream did not decode back");
	}

	#[test]
	fn t_entropy_picks_sub() {
		// Rows that are flat under Sub: the entropy heuristic must pick
		// filter one everywhere.
		let rows = gradient_rows();
		let f = Filterer::new(&rows, 4, 4, 1, false);
		let filtered = f.run(&FilterStrategy::Entropy, true);

		for y in 0..4 {
			assert_eq!(filtered[y * 5], 1, "row {y} should use Sub");
		}
		check_roundtrip(&rows, &filtered, 4, 4, 8);
	}

	#[test]
	fn t_strategies_decode_back() {
		let rows = gradient_rows();
		let f = Filterer::new(&rows, 4, 4, 1, false);

		let strategies = [
			FilterStrategy::Fixed(0),
			FilterStrategy::Fixed(2),
			FilterStrategy::Fixed(4),
			FilterStrategy::MinSum,
			FilterStrategy::Entropy,
			FilterStrategy::DistinctBytes,
			FilterStrategy::DistinctBigrams,
			FilterStrategy::BruteForce,
			FilterStrategy::Incremental,
			FilterStrategy::Incremental2,
			FilterStrategy::Incremental3,
			FilterStrategy::AllCheap,
			FilterStrategy::Predefined(vec![0, 1, 2, 3]),
		];
		for strategy in strategies {
			let filtered = f.run(&strategy, true);
			check_roundtrip(&rows, &filtered, 4, 4, 8);
		}
	}

	#[test]
	fn t_genetic_cancelled() {
		// With the kill flag pre-set, the search returns its seed
		// generation's best immediately, and the output still decodes.
		let rows = gradient_rows();
		let f = Filterer::new(&rows, 4, 4, 1, false);

		crate::CANCELLED.store(true, Relaxed);
		let filtered = f.run(&FilterStrategy::Genetic, true);
		crate::CANCELLED.store(false, Relaxed);

		check_roundtrip(&rows, &filtered, 4, 4, 8);
	}

	#[test]
	fn t_clean_rows_zero_out() {
		// Two RGBA pixels, the first fully transparent: under filter None
		// its RGB bytes become zero; alpha is preserved.
		let mut row = vec![9_u8, 9, 9, 0, 50, 60, 70, 255];
		clean_row(&mut row, None, 0);
		assert_eq!(row, [0, 0, 0, 0, 50, 60, 70, 255]);

		// Under Sub, the transparent pixel copies its left neighbor.
		let mut row = vec![50_u8, 60, 70, 255, 9, 9, 9, 0];
		clean_row(&mut row, None, 1);
		assert_eq!(row, [50, 60, 70, 255, 50, 60, 70, 0]);
	}

	#[test]
	fn t_gene_rng() {
		let mut a = GeneRng::new();
		let mut b = GeneRng::new();
		for _ in 0..32 {
			let x = a.next();
			assert_eq!(x, b.next());
		}
		for _ in 0..32 {
			let d = a.decimal();
			assert!((0.0..1.0).contains(&d));
		}
	}
}
