/*!
# Merma: Files!
*/

pub(super) mod gzip;
mod jpegtran;
pub(super) mod zip;

use crate::{
	EncodingError,
	FileKind,
	Settings,
};
use std::path::{
	Path,
	PathBuf,
};



/// # Encode a File.
///
/// This attempts to losslessly re-encode whatever the path holds,
/// overriding the original when the result is strictly smaller.
///
/// The before and after sizes are returned unless there's an error. When
/// compression doesn't help, the two sizes come back identical.
pub(super) fn encode(file: &Path, settings: Settings)
-> Result<(u64, u64), EncodingError> {
	// Read the file.
	let mut raw = std::fs::read(file).map_err(|_|
		if file.is_file() { EncodingError::Read }
		else { EncodingError::Vanished }
	)?;
	let before = raw.len() as u64;
	if before == 0 { return Err(EncodingError::Empty); }

	match FileKind::parse(&raw) {
		Some(FileKind::Png) => {
			if ! settings.png { return Err(EncodingError::Skipped); }
			let new = mafli::optimize_png(&raw, &settings.png_options())?;
			if new.len() < raw.len() {
				raw.truncate(new.len());
				raw.copy_from_slice(&new);
			}
		},
		Some(FileKind::Jpeg) => {
			if ! settings.jpeg { return Err(EncodingError::Skipped); }

			// Mozjpeg usually panics on error, so we have to do a weird
			// little dance to keep it from killing the whole thread.
			let raw2 = std::panic::catch_unwind(move || {
				encode_jpeg(&mut raw, settings);
				raw
			});

			// Move it back, so long as it wasn't corrupted along the way.
			match raw2 {
				Ok(r) if FileKind::parse(&r) == Some(FileKind::Jpeg) => { raw = r; },
				_ => return Ok((before, before)),
			}
		},
		Some(FileKind::Gzip) => {
			if ! settings.gzip { return Err(EncodingError::Skipped); }
			let new = gzip::recompress(&raw, settings)?;
			if new.len() < raw.len() { raw = new; }
		},
		Some(FileKind::Zip) => {
			if ! settings.zip { return Err(EncodingError::Skipped); }
			let new = zip::recompress(&raw, settings)?;
			if new.len() < raw.len() { raw = new; }
		},
		// Anything else can still ride the gzip/zip trains, gaining a
		// compressed sibling instead of replacing itself.
		None if settings.zip || settings.gzip => {
			return encode_sibling(file, &raw, settings);
		},
		None => return Err(EncodingError::Format),
	}

	// Save it if better.
	let after = raw.len() as u64;
	if after < before {
		write_atomic::write_file(file, &raw)
			.map(|()| (before, after))
			.map_err(|_| EncodingError::Write)
	}
	else { Ok((before, before)) }
}

/// # Compress a Loose File to a `.gz`/`.zip` Sibling.
///
/// Nothing is replaced: the archive lands next to the source, and only if
/// no such file already exists.
fn encode_sibling(file: &Path, raw: &[u8], settings: Settings)
-> Result<(u64, u64), EncodingError> {
	let before = raw.len() as u64;

	let (target, out): (PathBuf, Vec<u8>) =
		if settings.zip {
			let name = file.file_name()
				.and_then(std::ffi::OsStr::to_str)
				.ok_or(EncodingError::Format)?;
			let mut target = file.as_os_str().to_owned();
			target.push(".zip");
			(PathBuf::from(target), zip::compress_single(name, raw, settings)?)
		}
		else {
			let mut target = file.as_os_str().to_owned();
			target.push(".gz");
			(PathBuf::from(target), gzip::compress(raw, settings))
		};

	// First come, only served.
	if target.exists() { return Err(EncodingError::Skipped); }

	write_atomic::write_file(&target, &out)
		.map(|()| (before, out.len() as u64))
		.map_err(|_| EncodingError::Write)
}

/// # Compress w/ `MozJPEG`.
///
/// The result is comparable to running:
///
/// ```bash
/// jpegtran -copy none -optimize [-progressive]
/// ```
fn encode_jpeg(raw: &mut Vec<u8>, settings: Settings) {
	// Progressive scans usually win, but cost a few hundred bytes of
	// scan-script overhead that small files can't always recoup, hence the
	// second pass below.
	let progressive = settings.progressive &&
		(settings.level > 1 || raw.len() > 5000);

	if let Some(new) = unsafe {
		jpegtran::jpegtran_mem(raw, progressive, settings.arithmetic, settings.strip)
	} {
		if new.len() < raw.len() {
			raw.truncate(new.len());
			raw.copy_from_slice(&new);
		}
	}

	// Small files get a baseline re-try.
	if progressive && settings.level > 1 {
		let retry = match settings.level {
			2 => raw.len() < 8192,
			3 => raw.len() < 30_720,
			_ => true,
		};
		if retry {
			if let Some(new) = unsafe {
				jpegtran::jpegtran_mem(raw, false, settings.arithmetic, settings.strip)
			} {
				if new.len() < raw.len() {
					raw.truncate(new.len());
					raw.copy_from_slice(&new);
				}
			}
		}
	}
}
