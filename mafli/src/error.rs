/*!
# Mafli: Errors.
*/

#[cfg(debug_assertions)]
use std::fmt;



#[cfg(not(debug_assertions))]
/// # Internal Error (Release).
///
/// The encoder uses `Result` return types like conditionally-panicking
/// assertions. (Error responses shouldn't actually be possible, but, well,
/// bugs happen!)
///
/// When debug assertions are _disabled_, errors are bubbled up to the caller,
/// allowing it to gracefully abandon its efforts and keep the original file.
pub(crate) type MafliError = ();



#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # Internal Error (Debug).
///
/// When debug assertions are _enabled_, error responses carry the relevant
/// source details to aid further investigation.
pub(crate) struct MafliError {
	/// # Source File.
	file: &'static str,

	/// # Source Line.
	line: u32,
}

#[cfg(debug_assertions)]
impl MafliError {
	/// # New Error.
	pub(crate) const fn new(file: &'static str, line: u32) -> Self {
		Self { file, line }
	}
}

#[cfg(debug_assertions)]
impl fmt::Display for MafliError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!(
			"Mafli BUG!!! Sanity check failed at {}:{}",
			self.file,
			self.line,
		))
	}
}



#[cfg(debug_assertions)]
/// # Error Macro (Debug).
macro_rules! mafli_error { () => (crate::error::MafliError::new(file!(), line!())); }

#[cfg(not(debug_assertions))]
/// # Error Macro (Release).
macro_rules! mafli_error { () => (()); }

pub(crate) use mafli_error;



#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # Container Errors.
///
/// Unlike `MafliError` (an internal this-should-never-happen type), these
/// describe problems with the input, and are surfaced to callers so they
/// can report the file and move on with the original bytes intact.
pub enum ContainerError {
	/// # Bad Checksum or Deflate Stream.
	Decompress,

	/// # Structurally Invalid.
	Malformed,

	/// # Valid But Out of Scope.
	Unsupported,

	/// # Encoder Invariant Tripped.
	Encoder,
}

impl ContainerError {
	#[must_use]
	/// # As Str.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Decompress => "the compressed stream is corrupt",
			Self::Malformed => "the file structure is invalid",
			Self::Unsupported => "the color/depth combination is unsupported",
			Self::Encoder => "the encoder hit an internal snag",
		}
	}
}

impl AsRef<str> for ContainerError {
	#[inline]
	fn as_ref(&self) -> &str { self.as_str() }
}

impl std::error::Error for ContainerError {}

impl std::fmt::Display for ContainerError {
	#[inline]
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<MafliError> for ContainerError {
	#[inline]
	fn from(_err: MafliError) -> Self { Self::Encoder }
}
