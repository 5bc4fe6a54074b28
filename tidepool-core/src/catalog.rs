//! Static variant catalog for adaptive-bitrate output.
//!
//! Maps resolution labels to encode parameters, builds the ffmpeg argument
//! vector for one encode invocation, and renders the master-playlist
//! variant lines handed to the playlist writer.

use std::ffi::OsString;
use std::io;
use std::path::Path;

/// Name of the master playlist written into each per-file output directory.
pub const MASTER_PLAYLIST_NAME: &str = "playlist.m3u8";

/// Encode parameters for one resolution variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    /// Resolution label, e.g. "720p"
    pub label: &'static str,
    /// Target video bitrate
    pub video_bitrate: &'static str,
    /// Maximum video bitrate
    pub max_rate: &'static str,
    /// Rate-control buffer size
    pub buf_size: &'static str,
    /// Audio bitrate
    pub audio_bitrate: &'static str,
    /// Target resolution as WIDTHxHEIGHT
    pub resolution: &'static str,
    /// Bandwidth advertised in the master playlist
    pub bandwidth: u64,
}

static VARIANTS: [Variant; 4] = [
    Variant {
        label: "360p",
        video_bitrate: "800k",
        max_rate: "856k",
        buf_size: "1200k",
        audio_bitrate: "96k",
        resolution: "640x360",
        bandwidth: 800_000,
    },
    Variant {
        label: "480p",
        video_bitrate: "1400k",
        max_rate: "1498k",
        buf_size: "2100k",
        audio_bitrate: "128k",
        resolution: "842x480",
        bandwidth: 1_400_000,
    },
    Variant {
        label: "720p",
        video_bitrate: "5000k",
        max_rate: "5350k",
        buf_size: "10600k",
        audio_bitrate: "128k",
        resolution: "1280x720",
        bandwidth: 5_000_000,
    },
    Variant {
        label: "1080p",
        video_bitrate: "5000k",
        max_rate: "5350k",
        buf_size: "10600k",
        audio_bitrate: "192k",
        resolution: "1920x1080",
        bandwidth: 5_000_000,
    },
];

/// Errors from catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown resolution variant: {label}")]
    UnknownVariant { label: String },
}

/// Looks up the encode parameters for a resolution label.
pub fn variant(label: &str) -> Option<&'static Variant> {
    VARIANTS.iter().find(|variant| variant.label == label)
}

/// Resolves a declared list of labels, preserving order.
///
/// # Errors
/// - `CatalogError::UnknownVariant` - A label has no catalog entry
pub fn variants_for(labels: &[String]) -> Result<Vec<&'static Variant>, CatalogError> {
    labels
        .iter()
        .map(|label| {
            variant(label.trim()).ok_or_else(|| CatalogError::UnknownVariant {
                label: label.clone(),
            })
        })
        .collect()
}

/// Builds the ffmpeg argument vector for one (source, output dir, variant)
/// encode invocation.
///
/// Two profiles exist behind the hardware-acceleration flag: the hardware
/// profile encodes through `h264_omx` at the source height, the software
/// profile through `h264` scaled to height 1080 with even dimensions.
/// Both drop subtitle streams, force a 48-frame keyframe interval and cut
/// 10-second VOD segments.
pub fn transcode_args(
    source: &Path,
    output_dir: &Path,
    variant: &Variant,
    hardware_accel: bool,
) -> Vec<OsString> {
    let segment_pattern = output_dir.join(format!("{}_%03d.ts", variant.label));
    let variant_playlist = output_dir.join(format!("{}.m3u8", variant.label));

    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-y".into()];
    args.push("-i".into());
    args.push(source.into());
    args.extend(["-map".into(), "0".into(), "-map".into(), "-0:s".into()]);

    if !hardware_accel {
        args.extend(["-vf".into(), "scale=trunc(oh*a/2)*2:1080".into()]);
    }

    args.extend(["-c:a".into(), "aac".into()]);
    args.extend(["-b:a".into(), variant.audio_bitrate.into()]);
    args.extend(["-ac".into(), "2".into()]);

    if hardware_accel {
        args.extend(["-ar".into(), "48000".into()]);
        args.extend(["-c:v".into(), "h264_omx".into()]);
    } else {
        args.extend(["-c:v".into(), "h264".into()]);
    }

    args.extend(["-profile:v".into(), "main".into()]);
    args.extend(["-crf".into(), "20".into()]);
    args.extend(["-pix_fmt".into(), "yuv420p".into()]);
    args.extend(["-sc_threshold".into(), "0".into()]);
    args.extend(["-g".into(), "48".into()]);
    args.extend(["-keyint_min".into(), "48".into()]);
    args.extend(["-hls_time".into(), "10".into()]);
    args.extend(["-hls_playlist_type".into(), "vod".into()]);
    args.extend(["-b:v".into(), variant.video_bitrate.into()]);
    args.extend(["-maxrate".into(), variant.max_rate.into()]);
    args.extend(["-bufsize".into(), variant.buf_size.into()]);
    args.extend(["-preset".into(), "ultrafast".into()]);
    args.push("-hls_segment_filename".into());
    args.push(segment_pattern.into());
    args.push(variant_playlist.into());

    args
}

/// Renders the master playlist referencing every given variant.
///
/// One `#EXT-X-STREAM-INF` line plus a variant-playlist reference per
/// entry, in declared order.
pub fn master_playlist(variants: &[&Variant]) -> String {
    let mut playlist = String::from("#EXTM3U\n");

    for variant in variants {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH={},RESOLUTION={}\n{}.m3u8\n",
            variant.bandwidth, variant.resolution, variant.label
        ));
    }

    playlist
}

/// Writes the master playlist into an output directory.
///
/// Written before any encode runs, so the manifest is present even if
/// some variants later fail.
pub fn write_master_playlist(output_dir: &Path, variants: &[&Variant]) -> io::Result<()> {
    std::fs::write(output_dir.join(MASTER_PLAYLIST_NAME), master_playlist(variants))
}
