/*!
# Merma: Settings.
*/

use dactyl::traits::BytesToUnsigned;
use crate::MermaError;
use mafli::{
	EncoderOptions,
	PngOptions,
};



#[derive(Debug, Clone, Copy)]
/// # Runtime Settings.
///
/// The flattened CLI state, passed (by copy) to every worker.
pub(super) struct Settings {
	/// # Compression Level (1-9).
	pub(super) level: u8,

	/// # Optimize PNGs?
	pub(super) png: bool,

	/// # Optimize JPEGs?
	pub(super) jpeg: bool,

	/// # Gzip Mode.
	pub(super) gzip: bool,

	/// # Zip Mode.
	pub(super) zip: bool,

	/// # Strip Metadata?
	pub(super) strip: bool,

	/// # Progressive JPEG Output?
	pub(super) progressive: bool,

	/// # Arithmetic-Coded JPEG Output?
	pub(super) arithmetic: bool,

	/// # Strict Losslessness?
	pub(super) strict: bool,

	/// # Keep PNG Filters and Color Type?
	pub(super) reuse: bool,

	/// # Try All PNG Filter Strategies?
	pub(super) all_filters: bool,

	/// # Include the Brute-Force Strategies Too?
	pub(super) all_filters_brute: bool,

	/// # Palette Orderings to Try.
	pub(super) pal_sort: u8,

	/// # Per-Block Deflate Threads.
	pub(super) mt_deflate: usize,

	/// # Errors Only?
	pub(super) quiet: bool,

	/// # Recurse Into Directories?
	pub(super) recurse: bool,

	/// # Pretty Progress?
	pub(super) progress: bool,
}

impl Settings {
	/// # New (Defaults).
	pub(super) const fn new() -> Self {
		Self {
			level: 3,
			png: true,
			jpeg: true,
			gzip: false,
			zip: false,
			strip: false,
			progressive: false,
			arithmetic: false,
			strict: false,
			reuse: false,
			all_filters: false,
			all_filters_brute: false,
			pal_sort: 0,
			mt_deflate: 1,
			quiet: false,
			recurse: false,
			progress: false,
		}
	}

	/// # Set the Palette Sort Count From Raw Bytes.
	pub(super) fn set_pal_sort(&mut self, raw: &[u8]) -> Result<(), MermaError> {
		let n = u8::btou(raw.trim_ascii()).ok_or(MermaError::PalSort)?;
		if n > 120 { return Err(MermaError::PalSort); }
		self.pal_sort = n;
		Ok(())
	}

	/// # Set the Deflate Thread Count From Raw Bytes.
	pub(super) fn set_mt_deflate(&mut self, raw: Option<&[u8]>) -> Result<(), MermaError> {
		match raw {
			None => {
				self.mt_deflate = std::thread::available_parallelism()
					.map_or(1, std::num::NonZeroUsize::get);
				Ok(())
			},
			Some(raw) => {
				let n = u8::btou(raw.trim_ascii()).ok_or(MermaError::Threads)?;
				if n == 0 { return Err(MermaError::Threads); }
				self.mt_deflate = usize::from(n);
				Ok(())
			},
		}
	}

	/// # Engine Options.
	pub(super) fn encoder_options(self) -> EncoderOptions {
		let mut out = EncoderOptions::from_level(self.level);
		out.threads = self.mt_deflate;
		out
	}

	/// # PNG Options.
	pub(super) fn png_options(self) -> PngOptions {
		let mut out = PngOptions::from_level(self.level);
		out.encoder.threads = self.mt_deflate;
		out.strip = self.strip;
		out.strict = self.strict;
		out.reuse = self.reuse;
		out.all_filters = self.all_filters;
		out.all_filters_brute = self.all_filters_brute;
		out.pal_sort = self.pal_sort;
		out.quiet = self.quiet;
		out
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_pal_sort() {
		let mut s = Settings::new();
		assert!(s.set_pal_sort(b"12").is_ok());
		assert_eq!(s.pal_sort, 12);
		assert!(s.set_pal_sort(b"120").is_ok());
		assert!(s.set_pal_sort(b"121").is_err());
		assert!(s.set_pal_sort(b"banana").is_err());
	}

	#[test]
	fn t_mt() {
		let mut s = Settings::new();
		assert!(s.set_mt_deflate(Some(b"4")).is_ok());
		assert_eq!(s.mt_deflate, 4);
		assert!(s.set_mt_deflate(Some(b"0")).is_err());
		assert!(s.set_mt_deflate(None).is_ok());
		assert!(s.mt_deflate >= 1);
	}
}
