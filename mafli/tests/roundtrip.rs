/*!
# Mafli: End-to-End Checks.

Every encoded stream must inflate back to its source exactly, whatever the
shape of the input, and never balloon past it by more than the framing.
*/

use mafli::{
	deflate,
	EncoderOptions,
};



/// # Deflate, Inflate, Compare.
fn roundtrip(level: u8, data: &[u8]) {
	let options = EncoderOptions::from_level(level);
	let encoded = deflate(&options, true, data).expect("deflate failed");
	let back = miniz_oxide::inflate::decompress_to_vec(&encoded).expect("inflate failed");
	assert_eq!(back, data, "level {level} corrupted a {}-byte input", data.len());
}

#[test]
fn t_empty() { roundtrip(3, &[]); }

#[test]
fn t_one_byte() {
	roundtrip(3, &[0]);
	roundtrip(3, &[255]);
}

#[test]
fn t_counting_bytes() {
	// Ten bytes, no matches anywhere.
	let data: Vec<u8> = (0..10).collect();
	let options = EncoderOptions::from_level(3);
	let encoded = deflate(&options, true, &data).expect("deflate failed");
	assert!(encoded.len() < 30, "tiny literal input must stay tiny");
	roundtrip(3, &data);
}

#[test]
fn t_single_run() {
	// One repeated byte at a few instructive sizes.
	for n in [4_usize, 258, 259, 1000, 40_000] {
		roundtrip(2, &vec![0xAA; n]);
	}
}

#[test]
fn t_text() {
	let mut data = Vec::new();
	for i in 0_u32..300 {
		data.extend_from_slice(b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, ");
		data.extend_from_slice(i.to_string().as_bytes());
	}
	for level in [1, 2, 5, 9] { roundtrip(level, &data); }
}

#[test]
fn t_binary_structures() {
	// Regular binary records with shared prefixes and varying tails.
	let mut data = Vec::new();
	for i in 0_u64..2000 {
		data.extend_from_slice(&i.to_be_bytes());
		data.extend_from_slice(&[0, 0, 0, 0]);
		data.extend_from_slice(&(i * i).to_le_bytes());
	}
	roundtrip(3, &data);
}

#[test]
fn t_noise() {
	// Pseudo-random bytes: the stream should end up (near) stored.
	let mut state: u64 = 0x9E37_79B9;
	let data: Vec<u8> = (0..20_000).map(|_| {
		state ^= state << 13;
		state ^= state >> 7;
		state ^= state << 17;
		(state >> 32) as u8
	}).collect();

	let options = EncoderOptions::from_level(3);
	let encoded = deflate(&options, true, &data).expect("deflate failed");
	assert!(encoded.len() <= data.len() + 5 * (data.len().div_ceil(65_535)) + 8);
	roundtrip(3, &data);
}

#[test]
fn t_mixed_content() {
	// Alternating compressible and incompressible stretches, a classic
	// block-splitting layout.
	let mut state: u64 = 7;
	let mut data = Vec::new();
	for chunk in 0..6 {
		if chunk % 2 == 0 {
			data.extend(std::iter::repeat(b'x').take(5000));
		}
		else {
			for _ in 0..5000 {
				state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
				data.push((state >> 33) as u8);
			}
		}
	}
	roundtrip(4, &data);
}

#[test]
fn t_window_spanning_matches() {
	// Repetitions separated by (nearly) the whole window.
	let mut data = Vec::new();
	let phrase = b"a moderately long phrase to find again later";
	data.extend_from_slice(phrase);
	data.extend(std::iter::repeat(0_u8).take(32_000));
	data.extend_from_slice(phrase);
	roundtrip(3, &data);
}

#[test]
fn t_multithreaded_matches_single() {
	// Threading only changes scheduling, never bytes.
	let mut data = Vec::new();
	for i in 0_u32..120_000 {
		data.extend_from_slice(&(i % 1000).to_le_bytes());
	}

	let mut options = EncoderOptions::from_level(1);
	let single = deflate(&options, true, &data).expect("deflate failed");

	options.threads = 4;
	let multi = deflate(&options, true, &data).expect("deflate failed");

	assert_eq!(single, multi);
	assert_eq!(
		miniz_oxide::inflate::decompress_to_vec(&multi).expect("inflate failed"),
		data,
	);
}

#[test]
fn t_levels_agree_on_content() {
	// Different levels produce different streams, but every one of them
	// must decode to the same bytes.
	let mut data = Vec::new();
	for i in 0_u32..400 {
		data.extend_from_slice(b"some moderately repetitive content #");
		data.extend_from_slice(&i.to_be_bytes());
	}

	for level in 1..=9 {
		roundtrip(level, &data);
	}
}
