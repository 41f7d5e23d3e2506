/*!
# Merma: Errors.
*/

use argyle::ArgyleError;
use fyi_msg::ProglessError;
use std::{
	error::Error,
	fmt,
};



#[derive(Debug, Copy, Clone)]
/// # Per-File Encoding Errors.
///
/// These never abort the batch; the file is reported (maybe) and skipped,
/// its original bytes untouched.
pub(super) enum EncodingError {
	/// # Existing Stream Corrupt.
	Decode,

	/// # Empty File.
	Empty,

	/// # Wrong/Unknown Format.
	Format,

	/// # Read Error.
	Read,

	/// # Intentionally Skipped.
	Skipped,

	/// # Valid But Out of Scope.
	Unsupported,

	/// # Vanished.
	Vanished,

	/// # Write Error.
	Write,
}

impl EncodingError {
	#[must_use]
	/// # As Str.
	pub(super) const fn as_str(self) -> &'static str {
		match self {
			Self::Decode => "corrupt stream",
			Self::Empty => "empty file",
			Self::Format => "invalid format",
			Self::Read => "read error",
			Self::Skipped => "",
			Self::Unsupported => "unsupported layout",
			Self::Vanished => "vanished!",
			Self::Write => "write error",
		}
	}
}

impl From<mafli::ContainerError> for EncodingError {
	#[inline]
	fn from(err: mafli::ContainerError) -> Self {
		match err {
			mafli::ContainerError::Decompress => Self::Decode,
			mafli::ContainerError::Malformed => Self::Format,
			mafli::ContainerError::Unsupported => Self::Unsupported,
			mafli::ContainerError::Encoder => Self::Skipped,
		}
	}
}



#[derive(Debug, Copy, Clone)]
/// # General/Deal-Breaking Errors.
pub(super) enum MermaError {
	/// # Argyle Passthrough.
	Argue(ArgyleError),

	/// # Killed Early.
	Killed,

	/// # No Files.
	NoFiles,

	/// # Bad Palette Sort Count.
	PalSort,

	/// # Progress Passthrough.
	Progress(ProglessError),

	/// # Bad Thread Count.
	Threads,
}

impl AsRef<str> for MermaError {
	#[inline]
	fn as_ref(&self) -> &str { self.as_str() }
}

impl Error for MermaError {}

impl fmt::Display for MermaError {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<ArgyleError> for MermaError {
	#[inline]
	fn from(err: ArgyleError) -> Self { Self::Argue(err) }
}

impl From<ProglessError> for MermaError {
	#[inline]
	fn from(err: ProglessError) -> Self { Self::Progress(err) }
}

impl MermaError {
	#[must_use]
	/// # As Str.
	pub(super) const fn as_str(self) -> &'static str {
		match self {
			Self::Argue(e) => e.as_str(),
			Self::Killed => "The process was aborted early.",
			Self::NoFiles => "No optimizable files were found.",
			Self::PalSort => "Palette sort counts must be between 0..=120.",
			Self::Progress(_) => "Progress can only be displayed for 4,294,967,295 files or fewer.",
			Self::Threads => "Thread counts must be between 1..=255.",
		}
	}
}
