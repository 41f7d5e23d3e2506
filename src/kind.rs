/*!
# Merma: File Kind.
*/

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
/// # File Kind.
///
/// The file type is judged from its headers, ensuring files get processed
/// correctly even when their extensions lie (or not at all when they're
/// bunk).
pub(super) enum FileKind {
	/// # Gzip.
	Gzip,

	/// # Jpeg.
	Jpeg,

	/// # Png.
	Png,

	/// # Zip.
	Zip,
}

impl FileKind {
	/// # Parse Kind From Magic Bytes.
	pub(super) fn parse(src: &[u8]) -> Option<Self> {
		// If the source is big enough for headers, keep going!
		if src.len() > 12 {
			// PNG has just one way to be.
			if src[..8] == [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'] {
				return Some(Self::Png);
			}

			// JPEG has a lot of different possible headers. They all start
			// and end the same way, but differ some in the middle.
			if
				src[..3] == [0xFF, 0xD8, 0xFF] &&
				src[src.len() - 2..] == [0xFF, 0xD9] &&
				(
					src[3] == 0xDB ||
					src[3] == 0xEE ||
					(src[3..12] == [0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01]) ||
					(src[3] == 0xE1 && src[6..12] == [b'E', b'x', b'i', b'f', 0x00, 0x00])
				)
			{
				return Some(Self::Jpeg);
			}

			// Gzip: magic plus the deflate method byte.
			if src[..3] == [0x1F, 0x8B, 0x08] {
				return Some(Self::Gzip);
			}

			// Zip: a local file header. (Empty archives hold nothing worth
			// optimizing, so their EOCD-only form isn't matched.)
			if src[..4] == [b'P', b'K', 3, 4] {
				return Some(Self::Zip);
			}
		}

		None
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn t_kinds() {
		let mut png = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
		png.extend_from_slice(&[0; 16]);
		assert_eq!(FileKind::parse(&png), Some(FileKind::Png));

		let mut gz = vec![0x1F, 0x8B, 0x08, 0x00];
		gz.extend_from_slice(&[0; 16]);
		assert_eq!(FileKind::parse(&gz), Some(FileKind::Gzip));

		let mut zip = b"PK\x03\x04".to_vec();
		zip.extend_from_slice(&[0; 30]);
		assert_eq!(FileKind::parse(&zip), Some(FileKind::Zip));

		let mut jpg = vec![0xFF, 0xD8, 0xFF, 0xDB];
		jpg.extend_from_slice(&[0; 16]);
		jpg.extend_from_slice(&[0xFF, 0xD9]);
		assert_eq!(FileKind::parse(&jpg), Some(FileKind::Jpeg));

		assert_eq!(FileKind::parse(b"hello world, not an image"), None);
		assert_eq!(FileKind::parse(&[]), None);
	}
}
