//! PPM (P6) screenshot writer.
//!
//! ASCII header `P6\n<width> <height>\n255\n` followed by raw RGB
//! triples. Input is the pipeline's BGRA; conversion drops alpha and
//! reorders channels.

use std::io::{self, Write};
use std::path::Path;

pub fn encode_ppm(width: u32, height: u32, bgra: &[u8]) -> Vec<u8> {
    debug_assert_eq!(bgra.len(), (width as usize) * (height as usize) * 4);
    let mut out = Vec::with_capacity(32 + (width as usize) * (height as usize) * 3);
    out.extend_from_slice(format!("P6\n{width} {height}\n255\n").as_bytes());
    for px in bgra.chunks_exact(4) {
        out.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    out
}

pub fn write_ppm(path: &Path, width: u32, height: u32, bgra: &[u8]) -> io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(&encode_ppm(width, height, bgra))?;
    file.flush()?;
    tracing::info!(
        target: "render.screenshot",
        path = %path.display(),
        width,
        height,
        "screenshot_written"
    );
    Ok(())
}

/// Decode a P6 file produced by [`encode_ppm`]. Returns dimensions and
/// packed RGB rows. Used by tests and diagnostics; not a general PPM
/// reader (no comments, maxval fixed at 255).
pub fn decode_ppm(bytes: &[u8]) -> Option<(u32, u32, Vec<u8>)> {
    let mut fields = Vec::new();
    let mut pos = 0;
    // Three whitespace-separated header fields after the magic.
    let text = bytes;
    let mut field_start = None;
    while pos < text.len() && fields.len() < 4 {
        let b = text[pos];
        if b.is_ascii_whitespace() {
            if let Some(start) = field_start.take() {
                fields.push(&text[start..pos]);
            }
        } else if field_start.is_none() {
            field_start = Some(pos);
        }
        pos += 1;
        if fields.len() == 4 {
            break;
        }
    }
    if fields.len() != 4 || fields[0] != b"P6" || fields[3] != b"255" {
        return None;
    }
    let width: u32 = std::str::from_utf8(fields[1]).ok()?.parse().ok()?;
    let height: u32 = std::str::from_utf8(fields[2]).ok()?.parse().ok()?;
    let expected = (width as usize) * (height as usize) * 3;
    let data = &bytes[pos..];
    (data.len() == expected).then(|| (width, height, data.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_format() {
        let encoded = encode_ppm(2, 1, &[1, 2, 3, 255, 4, 5, 6, 255]);
        assert!(encoded.starts_with(b"P6\n2 1\n255\n"));
    }

    #[test]
    fn round_trip_preserves_rgb() {
        // BGRA in, RGB out: alpha dropped, channels reordered.
        let bgra = [10u8, 20, 30, 99, 40, 50, 60, 1];
        let encoded = encode_ppm(2, 1, &bgra);
        let (w, h, rgb) = decode_ppm(&encoded).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(rgb, vec![30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.ppm");
        let bgra = vec![0u8, 0, 255, 255]; // one red pixel
        write_ppm(&path, 1, 1, &bgra).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let (w, h, rgb) = decode_ppm(&bytes).unwrap();
        assert_eq!((w, h, rgb), (1, 1, vec![255, 0, 0]));
    }

    #[test]
    fn truncated_input_rejected() {
        let mut encoded = encode_ppm(2, 2, &[0u8; 16]);
        encoded.pop();
        assert!(decode_ppm(&encoded).is_none());
    }
}
