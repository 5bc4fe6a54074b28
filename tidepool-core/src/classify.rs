//! Video classification from container signatures.
//!
//! Items arriving from a swarm source routinely carry non-video payload
//! (samples, text, archives). Before transcoding, each file's leading
//! bytes are matched against known video container signatures; anything
//! unrecognized is pruned from the item.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of leading bytes inspected for classification.
pub const HEADER_LEN: usize = 261;

/// ftyp brands carried by MP4-family containers that hold video.
const FTYP_VIDEO_BRANDS: [&[u8; 4]; 10] = [
    b"isom", b"iso2", b"mp41", b"mp42", b"mmp4", b"avc1", b"dash", b"M4V ", b"qt  ",
    b"3gp4",
];

/// Reads a file's header and decides whether it is a video.
///
/// Unreadable or too-short files classify as non-video; that is an
/// expected pruning branch, not an error, so failures are only logged.
pub fn is_video(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            tracing::warn!(
                "Could not open {} for classification: {error}",
                path.display()
            );
            return false;
        }
    };

    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) => {
                tracing::warn!(
                    "Could not read {} for classification: {error}",
                    path.display()
                );
                return false;
            }
        }
    }

    sniff_video(&header[..filled])
}

/// Matches a header buffer against known video container signatures.
///
/// Covers the MP4 family (via ftyp brands), Matroska/WebM, AVI, ASF/WMV,
/// FLV, MPEG program streams and MPEG transport streams.
pub fn sniff_video(header: &[u8]) -> bool {
    if header.len() < 16 {
        return false;
    }

    // MP4 family: size-prefixed ftyp box with a known video brand
    if &header[4..8] == b"ftyp" {
        let brand = &header[8..12];
        if FTYP_VIDEO_BRANDS
            .iter()
            .any(|known| brand == &known[..] || brand[..3] == known[..3])
        {
            return true;
        }
    }

    // Matroska / WebM: EBML magic
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return true;
    }

    // AVI: RIFF container with AVI fourcc
    if header.starts_with(b"RIFF") && &header[8..12] == b"AVI " {
        return true;
    }

    // ASF / WMV header object GUID
    if header.starts_with(&[
        0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00,
        0x62, 0xCE, 0x6C,
    ]) {
        return true;
    }

    // FLV
    if header.starts_with(b"FLV\x01") {
        return true;
    }

    // MPEG program stream pack header or elementary video sequence
    if header.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || header.starts_with(&[0x00, 0x00, 0x01, 0xB3]) {
        return true;
    }

    // MPEG transport stream: sync byte repeating at the packet boundary
    if header[0] == 0x47 && header.len() > 188 && header[188] == 0x47 {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mp4_header(brand: &[u8; 4]) -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, 0x20];
        header.extend_from_slice(b"ftyp");
        header.extend_from_slice(brand);
        header.extend_from_slice(&[0x00; 8]);
        header
    }

    #[test]
    fn test_mp4_brands_classify_as_video() {
        assert!(sniff_video(&mp4_header(b"isom")));
        assert!(sniff_video(&mp4_header(b"mp42")));
        assert!(sniff_video(&mp4_header(b"avc1")));
        assert!(sniff_video(&mp4_header(b"qt  ")));
    }

    #[test]
    fn test_matroska_classifies_as_video() {
        let mut header = vec![0x1A, 0x45, 0xDF, 0xA3];
        header.resize(32, 0);
        assert!(sniff_video(&header));
    }

    #[test]
    fn test_avi_classifies_as_video() {
        let mut header = b"RIFF\x24\x00\x00\x00AVI LIST".to_vec();
        header.resize(32, 0);
        assert!(sniff_video(&header));
    }

    #[test]
    fn test_transport_stream_needs_repeating_sync() {
        let mut header = vec![0u8; HEADER_LEN];
        header[0] = 0x47;
        assert!(!sniff_video(&header));

        header[188] = 0x47;
        assert!(sniff_video(&header));
    }

    #[test]
    fn test_plain_data_is_not_video() {
        assert!(!sniff_video(b"this is just a text file, nothing more"));
        assert!(!sniff_video(&[0u8; HEADER_LEN]));
        assert!(!sniff_video(&[0u8; 4]));
    }

    #[test]
    fn test_unreadable_path_is_not_video() {
        assert!(!is_video(Path::new("/nonexistent/definitely/missing.mkv")));
    }

    #[test]
    fn test_classifies_on_disk_file() {
        let dir = tempfile::tempdir().unwrap();

        let video = dir.path().join("movie.mp4");
        std::fs::write(&video, mp4_header(b"isom")).unwrap();
        assert!(is_video(&video));

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"subtitle notes for the release, long enough to sniff").unwrap();
        assert!(!is_video(&text));
    }
}
