/*!
# Mafli

An opinionated DEFLATE re-encoder (and PNG remodeler) in the zopfli mold:
iterative shortest-path LZ77 parsing, bounded package-merge Huffman codes,
exhaustive tree-header searching, and cost-driven block splitting, plus the
PNG-side filter and color-model hunts that feed it.
*/

#![warn(
	clippy::filetype_is_file,
	clippy::integer_division,
	clippy::needless_borrow,
	clippy::nursery,
	clippy::pedantic,
	clippy::perf,
	clippy::suboptimal_flops,
	clippy::unneeded_field_pattern,
	macro_use_extern_crate,
	missing_copy_implementations,
	missing_debug_implementations,
	missing_docs,
	non_ascii_idents,
	trivial_casts,
	trivial_numeric_casts,
	unreachable_pub,
	unused_crate_dependencies,
	unused_extern_crates,
	unused_import_braces,
)]

#![allow(
	clippy::cast_possible_truncation,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::module_name_repetitions,
	clippy::redundant_pub_crate,
)]

mod blocks;
mod cache;
mod deflate;
mod error;
mod hash;
mod katajainen;
mod lz77;
mod png;
mod squeeze;
mod symbols;
mod tree;

pub use blocks::deflate;
pub use error::ContainerError;
pub use png::{
	optimize_png,
	optimize_filter_then_deflate,
	PngOptions,
};

use std::sync::atomic::AtomicBool;



/// # Cooperative Kill Switch.
///
/// Flipped by the embedding application's signal handler; polled by the
/// genetic filter search between generations (and nowhere else). Once
/// observed, the search returns its best-so-far rather than evolving on.
pub static CANCELLED: AtomicBool = AtomicBool::new(false);



#[derive(Debug, Clone, Copy)]
/// # Encoder Options.
///
/// The knobs the compression levels turn. Most callers should start from
/// `EncoderOptions::from_level` and adjust from there.
pub struct EncoderOptions {
	/// # Squeeze Passes Per Block.
	pub iterations: u32,

	/// # Take Matches Scoring This High Immediately.
	///
	/// The lazy parser defers matches below this score by one position;
	/// anything at or above it is grabbed on the spot.
	pub greed: u16,

	/// # Stop Searching at This Match Length.
	pub nice_match: u16,

	/// # Use the Wider Header/Count Searches?
	pub advanced: bool,

	/// # Maximum Literal-Expansion Passes Per Block.
	pub replace_codes: u32,

	/// # Use the Shannon Oracle for Split Costs?
	pub entropy_split: bool,

	/// # Interior Probe Count for the Split Search.
	pub split_probes: usize,

	/// # Skip Splitting Under This Many Input Bytes.
	pub no_split: usize,

	/// # Skip Splitting Under This Many Tokens.
	pub no_split_lz: usize,

	/// # Worker Threads for Master Blocks.
	pub threads: usize,

	/// # Tuned for Filtered Image Rows?
	pub png: bool,
}

impl Default for EncoderOptions {
	#[inline]
	fn default() -> Self { Self::from_level(3) }
}

impl EncoderOptions {
	#[must_use]
	/// # From a Compression Level (1-9).
	///
	/// Levels map onto iteration counts and search knobs; out-of-range
	/// values clamp.
	pub fn from_level(level: u8) -> Self {
		const ITERATIONS: [u32; 9] = [1, 5, 15, 25, 40, 60, 100, 150, 200];
		let level = level.clamp(1, 9);
		let iterations = ITERATIONS[usize::from(level) - 1];

		Self {
			iterations,
			greed: match level {
				1 => 64,
				2 => 128,
				_ => 259,
			},
			nice_match: if level <= 3 { 128 } else { 258 },
			advanced: level >= 6,
			replace_codes: if level >= 6 { u32::from(level) - 4 } else { 0 },
			entropy_split: level < 7,
			split_probes: if level <= 2 { 3 } else { 9 },
			no_split: 1024,
			no_split_lz: 10,
			threads: 1,
			png: false,
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_levels() {
		// Levels must clamp and scale monotonically.
		let lo = EncoderOptions::from_level(0);
		assert_eq!(lo.iterations, 1);

		let hi = EncoderOptions::from_level(200);
		assert_eq!(hi.iterations, 200);

		let mut last = 0;
		for level in 1..=9 {
			let o = EncoderOptions::from_level(level);
			assert!(o.iterations >= last);
			last = o.iterations;
		}
	}
}
