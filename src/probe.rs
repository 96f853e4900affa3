// ffprobe wrapper: codec info, duration and tags in one pass.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::PROBE_DEADLINE_SECS;
use crate::error::{MediaLibError, Result};
use crate::tools;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
    channels: Option<i64>,
    sample_rate: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
    disposition: Option<FfprobeDisposition>,
}

#[derive(Debug, Deserialize)]
struct FfprobeDisposition {
    attached_pic: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    tags: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbedAudioStream {
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub samplerate: Option<i64>,
    pub channels: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbedVideoStream {
    pub codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbedTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub date: Option<i64>,
}

/// Everything one probe pass learns about a file.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    pub duration_ms: Option<i64>,
    pub audio_streams: Vec<ProbedAudioStream>,
    pub video_streams: Vec<ProbedVideoStream>,
    /// A video stream that is only embedded artwork (attached_pic).
    pub has_artwork_only_video: bool,
    pub tags: ProbedTags,
}

impl MediaProbe {
    pub fn has_video(&self) -> bool {
        !self.video_streams.is_empty()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_streams.is_empty()
    }
}

/// Run ffprobe on a local path within the probing deadline.
pub fn probe(path: &Path) -> Result<MediaProbe> {
    let mut cmd = Command::new(tools::ffprobe_path());
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(path);

    let output = tools::run_with_deadline(cmd, Duration::from_secs(PROBE_DEADLINE_SECS))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaLibError::DecoderStart(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    Ok(build_probe(parsed))
}

fn build_probe(parsed: FfprobeOutput) -> MediaProbe {
    let mut result = MediaProbe::default();

    for stream in parsed.streams.unwrap_or_default() {
        match stream.codec_type.as_deref() {
            Some("video") => {
                let attached = stream
                    .disposition
                    .as_ref()
                    .and_then(|d| d.attached_pic)
                    .unwrap_or(0)
                    != 0;
                if attached {
                    result.has_artwork_only_video = true;
                    continue;
                }
                result.video_streams.push(ProbedVideoStream {
                    codec: stream.codec_name,
                    width: stream.width,
                    height: stream.height,
                    fps: parse_frame_rate(stream.r_frame_rate.as_deref()),
                });
            }
            Some("audio") => {
                if result.duration_ms.is_none() {
                    result.duration_ms = parse_duration_ms(stream.duration.as_deref());
                }
                result.audio_streams.push(ProbedAudioStream {
                    codec: stream.codec_name,
                    bitrate: stream.bit_rate.and_then(|s| s.parse().ok()),
                    samplerate: stream.sample_rate.and_then(|s| s.parse().ok()),
                    channels: stream.channels,
                });
            }
            _ => {}
        }
    }

    if let Some(format) = parsed.format {
        if result.duration_ms.is_none() {
            result.duration_ms = parse_duration_ms(format.duration.as_deref());
        }
        if let Some(tags) = format.tags {
            result.tags = parse_tags(&tags);
        }
    }

    result
}

/// Tag keys vary by container and case; normalize before matching.
fn parse_tags(tags: &serde_json::Map<String, serde_json::Value>) -> ProbedTags {
    let mut parsed = ProbedTags::default();
    for (key, value) in tags {
        let Some(value) = value.as_str() else { continue };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.to_ascii_lowercase().as_str() {
            "title" => parsed.title = Some(value.to_string()),
            "artist" => parsed.artist = Some(value.to_string()),
            "album_artist" | "albumartist" => parsed.album_artist = Some(value.to_string()),
            "album" => parsed.album = Some(value.to_string()),
            "genre" => parsed.genre = Some(value.to_string()),
            "track" => parsed.track_number = parse_pair_number(value),
            "disc" | "disc_number" => parsed.disc_number = parse_pair_number(value),
            "date" | "year" => parsed.date = parse_year(value),
            _ => {}
        }
    }
    parsed
}

/// "3/12" or "3".
fn parse_pair_number(value: &str) -> Option<i64> {
    let first = value.split('/').next()?;
    first.trim().parse().ok()
}

/// "2009", "2009-04-21", "2009/04".
fn parse_year(value: &str) -> Option<i64> {
    let year: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if year.len() == 4 {
        year.parse().ok()
    } else {
        None
    }
}

/// "30000/1001" -> 29.97
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    let rate = rate?;
    if let Some((num, den)) = rate.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate.parse().ok().filter(|v: &f64| *v > 0.0)
}

/// "123.456" seconds -> milliseconds
fn parse_duration_ms(duration: Option<&str>) -> Option<i64> {
    let seconds: f64 = duration?.parse().ok()?;
    if seconds <= 0.0 {
        return None;
    }
    Some((seconds * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate(Some("30/1")), Some(30.0));
        let ntsc = parse_frame_rate(Some("30000/1001")).unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate(Some("0/0")), None);
        assert_eq!(parse_frame_rate(None), None);
    }

    #[test]
    fn test_parse_duration_ms() {
        assert_eq!(parse_duration_ms(Some("12.5")), Some(12500));
        assert_eq!(parse_duration_ms(Some("0")), None);
        assert_eq!(parse_duration_ms(Some("garbage")), None);
    }

    #[test]
    fn test_parse_pair_number() {
        assert_eq!(parse_pair_number("3/12"), Some(3));
        assert_eq!(parse_pair_number("7"), Some(7));
        assert_eq!(parse_pair_number("x"), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2009"), Some(2009));
        assert_eq!(parse_year("2009-04-21"), Some(2009));
        assert_eq!(parse_year("april"), None);
    }

    #[test]
    fn test_probe_json_classification() {
        let raw = r#"{
            "streams": [
                {"codec_type": "video", "codec_name": "mjpeg",
                 "disposition": {"attached_pic": 1}},
                {"codec_type": "audio", "codec_name": "flac",
                 "channels": 2, "sample_rate": "44100", "duration": "180.0"}
            ],
            "format": {
                "duration": "180.5",
                "tags": {"ARTIST": "Otis", "Album": "Blue", "track": "2/10", "date": "1964"}
            }
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(raw).unwrap();
        let probe = build_probe(parsed);
        // The attached picture must not count as a video stream
        assert!(!probe.has_video());
        assert!(probe.has_artwork_only_video);
        assert!(probe.has_audio());
        assert_eq!(probe.duration_ms, Some(180_000));
        assert_eq!(probe.tags.artist.as_deref(), Some("Otis"));
        assert_eq!(probe.tags.album.as_deref(), Some("Blue"));
        assert_eq!(probe.tags.track_number, Some(2));
        assert_eq!(probe.tags.date, Some(1964));
    }
}
