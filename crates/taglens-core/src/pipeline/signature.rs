//! Media classification by file signature (magic bytes).
//!
//! Extensions lie; headers rarely do. A renamed PNG is still an image and an
//! `.mp4` holding HEIC data is not a video.

use std::io::Read;
use std::path::Path;

use crate::types::MediaKind;

/// Bytes read from the start of a file for sniffing. MPEG-TS needs a second
/// sync byte at offset 188.
pub const HEADER_LEN: usize = 192;

/// ISO BMFF major brands that denote still images (HEIF / AVIF).
const IMAGE_BRANDS: [&[u8; 4]; 10] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1", b"avif", b"avis",
];

/// Read up to [`HEADER_LEN`] bytes from the start of a file.
pub fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64).read_to_end(&mut header)?;
    Ok(header)
}

/// Classify a header as image or video. `None` if no known signature matches.
pub fn sniff(header: &[u8]) -> Option<MediaKind> {
    if header.len() < 4 {
        return None;
    }

    // JPEG: FF D8 FF
    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(MediaKind::Image);
    }

    // PNG: 89 50 4E 47
    if header.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(MediaKind::Image);
    }

    // GIF: GIF8
    if header.starts_with(b"GIF8") {
        return Some(MediaKind::Image);
    }

    // BMP: BM, file size, then four reserved bytes that are always zero
    if header.starts_with(b"BM") && header.len() >= 14 && header[6..10] == [0, 0, 0, 0] {
        return Some(MediaKind::Image);
    }

    // TIFF: II*\0 or MM\0*
    if header.starts_with(&[b'I', b'I', 0x2A, 0x00]) || header.starts_with(&[b'M', b'M', 0x00, 0x2A]) {
        return Some(MediaKind::Image);
    }

    // RIFF containers: WebP image or AVI video
    if header.starts_with(b"RIFF") && header.len() >= 12 {
        return match &header[8..12] {
            b"WEBP" => Some(MediaKind::Image),
            b"AVI " => Some(MediaKind::Video),
            _ => None,
        };
    }

    // Matroska / WebM: EBML header
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(MediaKind::Video);
    }

    // FLV
    if header.starts_with(b"FLV") {
        return Some(MediaKind::Video);
    }

    // MPEG program stream pack header
    if header.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return Some(MediaKind::Video);
    }

    // MPEG transport stream: sync byte every 188 bytes
    if header[0] == 0x47 && header.len() > 188 && header[188] == 0x47 {
        return Some(MediaKind::Video);
    }

    // ISO BMFF: size + box type at offset 4
    if header.len() >= 12 {
        match &header[4..8] {
            b"ftyp" => {
                let brand = &header[8..12];
                let is_image = IMAGE_BRANDS.iter().any(|b| b.as_slice() == brand);
                return Some(if is_image {
                    MediaKind::Image
                } else {
                    MediaKind::Video
                });
            }
            // Legacy QuickTime files without an ftyp box
            b"moov" | b"mdat" | b"wide" | b"free" | b"skip" => return Some(MediaKind::Video),
            _ => {}
        }
    }

    None
}
