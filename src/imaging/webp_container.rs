//! Minimal RIFF/WebP container editing for EXIF passthrough.
//!
//! libwebp's simple encoder emits a bare `VP8 ` or `VP8L` stream with no
//! metadata. To keep the source EXIF block we rewrite the container into the
//! extended format:
//!
//! ```text
//! RIFF <size> WEBP
//!   VP8X  flags + canvas size
//!   VP8 /VP8L/ALPH ...   (image data, unchanged)
//!   EXIF  raw TIFF-structured EXIF
//! ```
//!
//! The orientation tag inside the EXIF block is reset to 1 because the
//! encoder has already rotated the pixels.

const FLAG_EXIF: u8 = 0x08;
const FLAG_ALPHA: u8 = 0x10;
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TAG_ORIENTATION: u16 = 0x0112;

struct Chunk<'a> {
    fourcc: [u8; 4],
    payload: &'a [u8],
}

/// Split a WebP file into its top-level chunks.
fn parse_chunks(data: &[u8]) -> Option<Vec<Chunk<'_>>> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return None;
    }

    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let fourcc = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
        let size = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        let start = pos + 8;
        let end = start.checked_add(size)?;
        if end > data.len() {
            return None;
        }
        chunks.push(Chunk {
            fourcc,
            payload: &data[start..end],
        });
        // Chunks are padded to even length
        pos = end + (size & 1);
    }
    Some(chunks)
}

fn write_chunk(out: &mut Vec<u8>, fourcc: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

/// VP8L header: signature 0x2f, then 14+14 bits of size and one alpha bit.
fn vp8l_has_alpha(payload: &[u8]) -> bool {
    if payload.len() < 5 || payload[0] != 0x2f {
        return false;
    }
    let bits = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    (bits >> 28) & 1 == 1
}

fn vp8x_payload(flags: u8, width: u32, height: u32) -> [u8; 10] {
    let w = width.saturating_sub(1).to_le_bytes();
    let h = height.saturating_sub(1).to_le_bytes();
    [flags, 0, 0, 0, w[0], w[1], w[2], h[0], h[1], h[2]]
}

/// Embed an EXIF block into an encoded WebP image.
///
/// Returns `None` when the input is not a well-formed WebP file or the EXIF
/// block is empty; callers keep the untagged image in that case.
pub fn embed_exif(webp: &[u8], exif: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    let exif = exif.strip_prefix(EXIF_HEADER).unwrap_or(exif);
    if exif.is_empty() {
        return None;
    }
    let mut exif = exif.to_vec();
    reset_orientation(&mut exif);

    let chunks = parse_chunks(webp)?;
    let mut body = Vec::with_capacity(webp.len() + exif.len() + 32);
    body.extend_from_slice(b"WEBP");

    match chunks.first() {
        Some(first) if &first.fourcc == b"VP8X" => {
            let mut header = first.payload.to_vec();
            if header.is_empty() {
                return None;
            }
            header[0] |= FLAG_EXIF;
            write_chunk(&mut body, b"VP8X", &header);
            for chunk in chunks.iter().skip(1).filter(|c| &c.fourcc != b"EXIF") {
                write_chunk(&mut body, &chunk.fourcc, chunk.payload);
            }
        }
        Some(_) => {
            let alpha = chunks
                .iter()
                .any(|c| &c.fourcc == b"ALPH" || (&c.fourcc == b"VP8L" && vp8l_has_alpha(c.payload)));
            let flags = FLAG_EXIF | if alpha { FLAG_ALPHA } else { 0 };
            write_chunk(&mut body, b"VP8X", &vp8x_payload(flags, width, height));
            for chunk in &chunks {
                write_chunk(&mut body, &chunk.fourcc, chunk.payload);
            }
        }
        None => return None,
    }
    write_chunk(&mut body, b"EXIF", &exif);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Some(out)
}

/// Read the raw EXIF block from a WebP file, if it carries one.
pub fn read_exif(webp: &[u8]) -> Option<Vec<u8>> {
    parse_chunks(webp)?
        .into_iter()
        .find(|c| &c.fourcc == b"EXIF")
        .map(|c| c.payload.to_vec())
}

// ---------------------------------------------------------------------------
// TIFF orientation patching
// ---------------------------------------------------------------------------

/// Set the IFD0 orientation tag to 1 (top-left) in a TIFF-structured EXIF block.
///
/// Leaves the block untouched when it is malformed or has no orientation tag.
pub fn reset_orientation(tiff: &mut [u8]) {
    if let Some(pos) = find_orientation(tiff) {
        let one = match &tiff[0..2] {
            b"MM" => 1u16.to_be_bytes(),
            _ => 1u16.to_le_bytes(),
        };
        tiff[pos..pos + 2].copy_from_slice(&one);
    }
}

/// Current orientation value from IFD0.
pub fn read_orientation(tiff: &[u8]) -> Option<u16> {
    let pos = find_orientation(tiff)?;
    let big_endian = &tiff[0..2] == b"MM";
    let bytes = [tiff[pos], tiff[pos + 1]];
    Some(if big_endian {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    })
}

/// Byte offset of the orientation value inside IFD0.
fn find_orientation(tiff: &[u8]) -> Option<usize> {
    if tiff.len() < 8 {
        return None;
    }
    let big_endian = match &tiff[0..2] {
        b"II" => false,
        b"MM" => true,
        _ => return None,
    };
    let read_u16 = |pos: usize| -> Option<u16> {
        let b = tiff.get(pos..pos + 2)?;
        Some(if big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    };
    let read_u32 = |pos: usize| -> Option<u32> {
        let b = tiff.get(pos..pos + 4)?;
        Some(if big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    };

    let ifd = read_u32(4)? as usize;
    let count = read_u16(ifd)? as usize;
    (0..count)
        .map(|i| ifd + 2 + i * 12)
        .find(|&entry| read_u16(entry) == Some(TAG_ORIENTATION))
        .map(|entry| entry + 8)
        .filter(|&value| value + 2 <= tiff.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian TIFF with a single IFD0 entry: orientation = `value`.
    fn exif_with_orientation(value: u16) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&TAG_ORIENTATION.to_le_bytes());
        tiff.extend_from_slice(&3u16.to_le_bytes()); // SHORT
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&value.to_le_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff
    }

    fn simple_webp(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut body = b"WEBP".to_vec();
        write_chunk(&mut body, fourcc, payload);
        let mut out = b"RIFF".to_vec();
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn reset_orientation_little_endian() {
        let mut exif = exif_with_orientation(6);
        assert_eq!(read_orientation(&exif), Some(6));
        reset_orientation(&mut exif);
        assert_eq!(read_orientation(&exif), Some(1));
    }

    #[test]
    fn reset_orientation_ignores_garbage() {
        let mut garbage = vec![1, 2, 3];
        reset_orientation(&mut garbage);
        assert_eq!(garbage, vec![1, 2, 3]);
    }

    #[test]
    fn embed_into_simple_lossy() {
        let webp = simple_webp(b"VP8 ", &[0xAA; 11]);
        let exif = exif_with_orientation(8);

        let out = embed_exif(&webp, &exif, 640, 480).unwrap();
        let chunks = parse_chunks(&out).unwrap();
        let names: Vec<&[u8; 4]> = chunks.iter().map(|c| &c.fourcc).collect();
        assert_eq!(names, vec![b"VP8X", b"VP8 ", b"EXIF"]);

        let vp8x = chunks[0].payload;
        assert_eq!(vp8x[0], FLAG_EXIF);
        assert_eq!(u32::from_le_bytes([vp8x[4], vp8x[5], vp8x[6], 0]), 639);
        assert_eq!(u32::from_le_bytes([vp8x[7], vp8x[8], vp8x[9], 0]), 479);

        // Odd-sized payload survived padding
        assert_eq!(chunks[1].payload.len(), 11);
        assert_eq!(read_orientation(&read_exif(&out).unwrap()), Some(1));
    }

    #[test]
    fn embed_sets_alpha_flag_for_vp8l_with_alpha() {
        let mut header = vec![0x2f];
        header.extend_from_slice(&(1u32 << 28).to_le_bytes());
        let webp = simple_webp(b"VP8L", &header);

        let out = embed_exif(&webp, &exif_with_orientation(1), 1, 1).unwrap();
        let chunks = parse_chunks(&out).unwrap();
        assert_eq!(chunks[0].payload[0], FLAG_EXIF | FLAG_ALPHA);
    }

    #[test]
    fn embed_strips_exif_header_prefix() {
        let webp = simple_webp(b"VP8 ", &[0; 10]);
        let mut prefixed = EXIF_HEADER.to_vec();
        prefixed.extend_from_slice(&exif_with_orientation(3));

        let out = embed_exif(&webp, &prefixed, 10, 10).unwrap();
        assert_eq!(&read_exif(&out).unwrap()[0..2], b"II");
    }

    #[test]
    fn embed_rejects_non_webp() {
        assert!(embed_exif(b"not a webp file", &exif_with_orientation(1), 1, 1).is_none());
    }

    #[test]
    fn embed_rejects_empty_exif() {
        let webp = simple_webp(b"VP8 ", &[0; 10]);
        assert!(embed_exif(&webp, EXIF_HEADER, 1, 1).is_none());
    }
}
