/*!
# Merma

Losslessly squeeze la mierda out of PNG, JPEG, GZIP, and ZIP files.
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

mod error;
mod image;
mod jobs;
mod kind;
mod settings;

use argyle::{
	Argue,
	ArgyleError,
	FLAG_HELP,
	FLAG_REQUIRED,
	FLAG_VERSION,
};
use dowser::Dowser;
use fyi_msg::MsgKind;
use std::{
	num::NonZeroUsize,
	path::PathBuf,
};

pub(crate) use error::{
	EncodingError,
	MermaError,
};
pub(crate) use kind::FileKind;
pub(crate) use settings::Settings;



/// # Main.
fn main() {
	match _main() {
		Ok(()) => {},
		Err(MermaError::Argue(ArgyleError::WantsVersion)) => {
			println!(concat!("Merma v", env!("CARGO_PKG_VERSION")));
		},
		Err(MermaError::Argue(ArgyleError::WantsHelp)) => { helper(); },
		Err(e) => {
			MsgKind::Error.into_msg(e.as_str()).eprint();
			std::process::exit(1);
		},
	}
}

#[inline]
/// # Actual Main.
fn _main() -> Result<(), MermaError> {
	// The CLI arguments.
	let args = Argue::new(FLAG_HELP | FLAG_REQUIRED | FLAG_VERSION)?
		.with_list();

	let mut settings = Settings::new();

	// Levels first.
	for (key, level) in [
		(&b"-1"[..], 1_u8), (&b"-2"[..], 2), (&b"-3"[..], 3),
		(&b"-4"[..], 4), (&b"-5"[..], 5), (&b"-6"[..], 6),
		(&b"-7"[..], 7), (&b"-8"[..], 8), (&b"-9"[..], 9),
	] {
		if args.switch(key) { settings.level = level; }
	}

	// The simple toggles.
	settings.strip = args.switch2(b"-strip", b"--strip");
	settings.progressive = args.switch2(b"-progressive", b"--progressive");
	settings.recurse = args.switch2(b"-recurse", b"--recurse");
	settings.gzip = args.switch2(b"-gzip", b"--gzip");
	settings.quiet = args.switch2(b"-quiet", b"--quiet");
	settings.progress = args.switch2(b"-p", b"--progress");
	settings.strict = args.switch(b"--strict");
	settings.reuse = args.switch(b"--reuse");
	settings.all_filters = args.switch(b"--allfilters");
	settings.arithmetic = args.switch(b"--arithmetic");
	if args.switch(b"--allfilters-b") {
		settings.all_filters = true;
		settings.all_filters_brute = true;
	}
	if args.switch2(b"-zip", b"--zip") {
		settings.zip = true;
		settings.gzip = true;
	}
	if args.switch(b"--no-jpeg") { settings.jpeg = false; }
	if args.switch(b"--no-png") { settings.png = false; }

	// Reusing filters forecloses on searching for new ones.
	if settings.reuse { settings.all_filters = false; }

	// The value-taking options.
	if let Some(raw) = args.option(b"--pal_sort") {
		settings.set_pal_sort(raw)?;
	}
	if let Some(raw) = args.option(b"--mt-deflate") {
		settings.set_mt_deflate(Some(raw))?;
	}
	else if args.switch(b"--mt-deflate") { settings.set_mt_deflate(None)?; }

	// Round up the files.
	let files = find_files(&args, settings)?;

	// One worker per core, one file per worker.
	let threads = std::thread::available_parallelism()
		.unwrap_or(NonZeroUsize::MIN);

	if settings.progress && ! settings.quiet {
		jobs::exec_pretty(threads, settings, &files)
	}
	else {
		jobs::exec(threads, settings, &files)
	}
}

/// # Find the Files.
///
/// Directories are only crawled under `-recurse`; otherwise path arguments
/// are taken at face value. Extension filtering is just a pre-screen; the
/// real type check happens per-file from the magic bytes.
fn find_files(args: &Argue, settings: Settings) -> Result<Vec<PathBuf>, MermaError> {
	let mut files: Vec<PathBuf> =
		if settings.recurse {
			let mut crawl = Dowser::default();
			for p in args.args_os() { crawl = crawl.with_path(p); }
			crawl.filter(|p| settings.gzip || wanted_extension(p)).collect()
		}
		else {
			args.args_os()
				.map(PathBuf::from)
				.filter(|p| p.is_file())
				.collect()
		};

	files.sort();
	files.dedup();

	if files.is_empty() { Err(MermaError::NoFiles) }
	else { Ok(files) }
}

/// # Plausible Extension?
fn wanted_extension(path: &std::path::Path) -> bool {
	path.extension()
		.and_then(std::ffi::OsStr::to_str)
		.is_some_and(|ext| {
			let ext = ext.to_ascii_lowercase();
			matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gz" | "zip")
		})
}

#[cold]
/// # Print Help.
fn helper() {
	println!(concat!(
		r"
      __ ___  ___ _ __ _ __ ___   __ _
     |  '_  \/ _ \ '__| '_ ` _ \ / _` |
     |  | | |  __/ |  | | | | | | (_| |
     |__| |_|\___|_|  |_| |_| |_|\__,_|  ",
		"\x1b[38;5;199mMerma\x1b[0;38;5;69m v", env!("CARGO_PKG_VERSION"), "\x1b[0m",
		r"

Losslessly squeeze la mierda out of PNG, JPEG, GZIP, and ZIP files.

USAGE:
    merma [FLAGS] [OPTIONS] <PATH(S)...>

FLAGS:
    -1 .. -9         Compression level. [default: -3]
    -strip           Strip metadata (ancillary chunks, JPEG markers).
    -progressive     Use progressive encoding for JPEGs.
    -recurse         Recursively search directories.
    -gzip            Recompress GZIP files; gzip everything else.
    -zip             Recompress ZIP files; zip everything else.
    -quiet           Print only error messages.
    -p, --progress   Show pretty progress while crunching.
        --strict     Strict losslessness (no transparent-pixel cleaning).
        --reuse      Keep PNG filters and color type as-is.
        --allfilters Try every PNG filter strategy.
        --allfilters-b
                     ... including the brute-force and genetic searches.
        --arithmetic Arithmetic-coded JPEG output (incompatible with
                     most software).
        --no-jpeg    Skip JPEG files.
        --no-png     Skip PNG files.
    -h, --help       Print help information and exit.
    -V, --version    Print version information and exit.

OPTIONS:
        --pal_sort <NUM>    Try up to NUM palette sort strategies. (<=120)
        --mt-deflate <NUM>  Use per-block multithreading in DEFLATE.
    -l, --list <FILE>       Read (absolute) file and/or directory paths
                            from this text file, one entry per line.

Files are only ever replaced when the new version is strictly smaller.
Press CTRL+C once for a graceful early exit, twice to die right away.
",
	));
}
