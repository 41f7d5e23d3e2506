/*!
# Merma: Job Server.
*/

use crate::{
	EncodingError,
	MermaError,
	Settings,
};
use crossbeam_channel::Receiver;
use dactyl::{
	NiceElapsed,
	NiceU64,
	traits::NiceInflection,
};
use fyi_msg::{
	BeforeAfter,
	Msg,
	MsgKind,
	Progless,
};
use std::{
	num::NonZeroUsize,
	path::{
		Path,
		PathBuf,
	},
	sync::{
		Arc,
		atomic::{
			AtomicBool,
			AtomicU64,
			Ordering::{
				Acquire,
				Relaxed,
				SeqCst,
			},
		},
	},
	thread,
};



/// # Progress Counters.
static SKIPPED: AtomicU64 = AtomicU64::new(0);

/// # Total Bytes In.
static BEFORE: AtomicU64 = AtomicU64::new(0);

/// # Total Bytes Out.
static AFTER: AtomicU64 = AtomicU64::new(0);



#[inline(never)]
/// # Crunch Everything!
///
/// This processes each file in `files` in parallel using up to `threads`
/// threads.
pub(super) fn exec(mut threads: NonZeroUsize, settings: Settings, files: &[PathBuf])
-> Result<(), MermaError> {
	let total = NonZeroUsize::new(files.len()).ok_or(MermaError::NoFiles)?;
	if total < threads { threads = total; }

	// Set up the killswitch.
	let killed = Arc::new(AtomicBool::new(false));
	sigint(Arc::clone(&killed), None);

	// Thread business!
	let (tx, rx) = crossbeam_channel::bounded::<&Path>(threads.get());
	thread::scope(|s| {
		// Set up the worker threads.
		let mut workers = Vec::with_capacity(threads.get());
		for _ in 0..threads.get() {
			workers.push(s.spawn(||
				while let Ok(p) = rx.recv() {
					let _res = crate::image::encode(p, settings);
				}
			));
		}

		// Push all the files to it, then drop the sender to disconnect.
		for file in files {
			if killed.load(Acquire) || tx.send(file).is_err() { break; }
		}
		drop(tx);

		// Wait for the threads to finish!
		for worker in workers { let _res = worker.join(); }
	});
	drop(rx);

	// Early abort?
	if killed.load(Acquire) { Err(MermaError::Killed) }
	else { Ok(()) }
}

#[inline(never)]
/// # Crunch Everything (With Progress)!
///
/// Same as `exec`, but with a progress bar and summary.
pub(super) fn exec_pretty(mut threads: NonZeroUsize, settings: Settings, files: &[PathBuf])
-> Result<(), MermaError> {
	#[inline(never)]
	/// # Worker Business.
	///
	/// Listen for file paths, processing them as they come in.
	fn work(rx: &Receiver::<&Path>, progress: &Progless, settings: Settings) {
		while let Ok(p) = rx.recv() {
			let name = p.to_string_lossy();
			progress.add(&name);

			match crate::image::encode(p, settings) {
				// Happy.
				Ok((b, a)) => {
					BEFORE.fetch_add(b, Relaxed);
					AFTER.fetch_add(a, Relaxed);
				},
				// Skipped.
				Err(e) => {
					SKIPPED.fetch_add(1, Relaxed);
					if ! matches!(e, EncodingError::Skipped) {
						skip_warn(p, e, progress);
					}
				},
			}

			progress.remove(&name);
		}
	}

	let total = NonZeroUsize::new(files.len()).ok_or(MermaError::NoFiles)?;
	if total < threads { threads = total; }

	// Boot up a progress bar.
	let progress = Progless::try_from(total.get())?
		.with_reticulating_splines("Merma");

	// Set up the killswitch.
	let killed = Arc::new(AtomicBool::new(false));
	sigint(Arc::clone(&killed), Some(progress.clone()));

	// Thread business!
	let (tx, rx) = crossbeam_channel::bounded::<&Path>(threads.get());
	thread::scope(|s| {
		// Set up the worker threads.
		let mut workers = Vec::with_capacity(threads.get());
		for _ in 0..threads.get() {
			workers.push(s.spawn(|| work(&rx, &progress, settings)));
		}

		// Push all the files to it, then drop the sender to disconnect.
		for file in files {
			if killed.load(Acquire) || tx.send(file).is_err() { break; }
		}
		drop(tx);

		// Wait for the threads to finish!
		for worker in workers { let _res = worker.join(); }
	});
	drop(rx);

	// Summarize!
	let elapsed = progress.finish();
	let skipped = SKIPPED.load(Acquire);
	if skipped == 0 {
		progress.summary(MsgKind::Crunched, "file", "files")
	}
	else {
		Msg::crunched(format!(
			"{}\x1b[2m/\x1b[0m{} in {}.",
			NiceU64::from(total.get() as u64 - skipped),
			total.nice_inflect("file", "files"),
			NiceElapsed::from(elapsed),
		))
	}
		.with_bytes_saved(BeforeAfter::from((
			BEFORE.load(Acquire),
			AFTER.load(Acquire),
		)))
		.eprint();

	// Early abort?
	if killed.load(Acquire) { Err(MermaError::Killed) }
	else { Ok(()) }
}



#[inline(never)]
/// # Hook Up CTRL+C.
///
/// Once stops accepting new work (already-running searches fall back to
/// their best-so-far), twice forces immediate shutdown.
fn sigint(killed: Arc<AtomicBool>, progress: Option<Progless>) {
	let _res = ctrlc::set_handler(move ||
		if killed.compare_exchange(false, true, SeqCst, Relaxed).is_ok() {
			mafli::CANCELLED.store(true, SeqCst);
			if let Some(p) = &progress { p.sigint(); }
		}
		else { std::process::exit(1); }
	);
}

#[cold]
#[inline(never)]
/// # Warn About a Skipped File.
fn skip_warn(file: &Path, err: EncodingError, progress: &Progless) {
	progress.push_msg(Msg::custom("Skipped", 11, &format!(
		"{} \x1b[2m({})\x1b[0m",
		file.to_string_lossy(),
		err.as_str(),
	)), true);
}
