// Thumbnail extraction.
//
// A single ffmpeg invocation decodes one frame, scales it to the target
// width (height follows the aspect ratio, floored at the target height) and
// center-crops to the final size. The frame is written to a temp file and
// renamed into place so a crash never leaves a partial image.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::constants::{
    THUMBNAIL_DEADLINE_SECS, THUMBNAIL_FALLBACK_SEEK_RATIO, THUMBNAIL_HEIGHT, THUMBNAIL_QUALITY,
    THUMBNAIL_SEEK_RATIO, THUMBNAIL_WIDTH,
};
use crate::error::{MediaLibError, Result};
use crate::tools;

/// Scale target for a source of the given dimensions: aim at the desired
/// width, keep the aspect ratio, and never land under the desired height
/// (really wide sources grow back from the height instead).
pub(crate) fn scaled_dimensions(input_width: u32, input_height: u32) -> (u32, u32) {
    if input_width == 0 || input_height == 0 {
        return (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT);
    }
    let aspect = input_width as f64 / input_height as f64;
    let mut width = THUMBNAIL_WIDTH;
    let mut height = (width as f64 / aspect) as u32 + 1;
    if height < THUMBNAIL_HEIGHT {
        width = (aspect * THUMBNAIL_HEIGHT as f64) as u32;
        height = THUMBNAIL_HEIGHT;
    }
    (width, height)
}

/// Center-crop offsets from scaled to final size.
pub(crate) fn crop_offsets(width: u32, height: u32) -> (u32, u32) {
    let h_offset = if width > THUMBNAIL_WIDTH {
        (width - THUMBNAIL_WIDTH) / 2
    } else {
        0
    };
    let v_offset = if height > THUMBNAIL_HEIGHT {
        (height - THUMBNAIL_HEIGHT) / 2
    } else {
        0
    };
    (h_offset, v_offset)
}

fn seek_seconds(duration_ms: Option<i64>) -> f64 {
    match duration_ms {
        // A known duration aims at 1/4th of the media
        Some(d) if d > 0 => (d as f64 / 1000.0) * THUMBNAIL_SEEK_RATIO,
        // 40% of nothing is unknowable; probe streams usually still carry a
        // duration, so this only happens for broken files
        _ => THUMBNAIL_FALLBACK_SEEK_RATIO,
    }
    .max(0.1)
}

fn format_seek(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = seconds % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}

/// Extract, scale, crop and compress one poster frame.
pub(crate) fn generate_video_thumbnail(
    source: &Path,
    output: &Path,
    duration_ms: Option<i64>,
    source_dimensions: Option<(u32, u32)>,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = output.with_extension("tmp.jpg");

    let filter = match source_dimensions {
        Some((w, h)) => {
            let (sw, sh) = scaled_dimensions(w, h);
            let (hoff, voff) = crop_offsets(sw, sh);
            format!(
                "scale={sw}:{sh},crop={tw}:{th}:{hoff}:{voff}",
                tw = THUMBNAIL_WIDTH.min(sw),
                th = THUMBNAIL_HEIGHT.min(sh),
            )
        }
        None => format!(
            "scale={w}:-1,crop='min({w},iw)':'min({h},ih)'",
            w = THUMBNAIL_WIDTH,
            h = THUMBNAIL_HEIGHT,
        ),
    };

    // ffmpeg quality scale is 1-31 where 1 is best
    let q_value = ((100 - THUMBNAIL_QUALITY) as f32 / 100.0 * 30.0 + 1.0) as u32;
    let seek = format_seek(seek_seconds(duration_ms));

    let mut cmd = Command::new(tools::ffmpeg_path());
    cmd.arg("-y")
        .args(["-ss", &seek])
        .arg("-i")
        .arg(source)
        .args(["-an", "-sn", "-dn"])
        .args(["-vframes", "1"])
        .args(["-vf", &filter])
        .args(["-q:v", &q_value.to_string()])
        .arg(&tmp_path);

    let output_res = tools::run_with_deadline(cmd, Duration::from_secs(THUMBNAIL_DEADLINE_SECS));
    let out = match output_res {
        Ok(out) => out,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    if !out.status.success() {
        let _ = std::fs::remove_file(&tmp_path);
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(MediaLibError::ThumbnailCompress(format!(
            "ffmpeg failed on {}: {}",
            source.display(),
            stderr.trim()
        )));
    }

    std::fs::rename(&tmp_path, output)?;

    if std::fs::metadata(output)?.len() == 0 {
        let _ = std::fs::remove_file(output);
        return Err(MediaLibError::ThumbnailCompress(format!(
            "empty thumbnail for {}",
            source.display()
        )));
    }
    Ok(())
}

/// Pull the attached picture out of an audio file, unscaled.
pub(crate) fn extract_embedded_artwork(source: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = output.with_extension("tmp.jpg");

    let mut cmd = Command::new(tools::ffmpeg_path());
    cmd.arg("-y")
        .arg("-i")
        .arg(source)
        .args(["-an", "-frames:v", "1"])
        .arg(&tmp_path);

    let out = match tools::run_with_deadline(cmd, Duration::from_secs(THUMBNAIL_DEADLINE_SECS)) {
        Ok(out) => out,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    };
    if !out.status.success() {
        let _ = std::fs::remove_file(&tmp_path);
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(MediaLibError::ThumbnailCompress(format!(
            "artwork extraction failed on {}: {}",
            source.display(),
            stderr.trim()
        )));
    }
    std::fs::rename(&tmp_path, output)?;
    if std::fs::metadata(output)?.len() == 0 {
        let _ = std::fs::remove_file(output);
        return Err(MediaLibError::ThumbnailCompress(format!(
            "empty artwork for {}",
            source.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_dimensions_regular_video() {
        // 16:9 source: width pinned, height above the floor
        let (w, h) = scaled_dimensions(1920, 1080);
        assert_eq!(w, 320);
        assert_eq!(h, 181);
        // 4:3 source
        let (w, h) = scaled_dimensions(640, 480);
        assert_eq!(w, 320);
        assert_eq!(h, 241);
    }

    #[test]
    fn test_scaled_dimensions_wide_video_grows_from_height() {
        // Ultra-wide: scaling to width 320 would land under the height floor
        let (w, h) = scaled_dimensions(2000, 500);
        assert_eq!(h, 200);
        assert_eq!(w, 800);
    }

    #[test]
    fn test_crop_is_centered() {
        let (hoff, voff) = crop_offsets(800, 200);
        assert_eq!(hoff, (800 - 320) / 2);
        assert_eq!(voff, 0);
        let (hoff, voff) = crop_offsets(320, 241);
        assert_eq!(hoff, 0);
        assert_eq!(voff, (241 - 200) / 2);
    }

    #[test]
    fn test_seek_position() {
        // 1/4th of a known duration
        assert!((seek_seconds(Some(60_000)) - 15.0).abs() < f64::EPSILON);
        // Bounded away from zero
        assert!(seek_seconds(Some(100)) >= 0.1);
        assert!(seek_seconds(None) >= 0.1);
    }

    #[test]
    fn test_format_seek() {
        assert_eq!(format_seek(0.1), "00:00:00.100");
        assert_eq!(format_seek(65.25), "00:01:05.250");
        assert_eq!(format_seek(3661.0), "01:01:01.000");
    }
}
