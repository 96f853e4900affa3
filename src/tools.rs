// External decoder resolver for ffmpeg/ffprobe.
//
// Resolution order:
// 1) Environment variable override (MEDIALIB_FFPROBE_PATH, MEDIALIB_FFMPEG_PATH)
// 2) Sidecar next to the executable (and bin/ subdirectory)
// 3) PATH fallback

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::{MediaLibError, Result};

static FFMPEG_PATH: OnceLock<PathBuf> = OnceLock::new();
static FFPROBE_PATH: OnceLock<PathBuf> = OnceLock::new();

fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }
        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

pub fn ffprobe_path() -> PathBuf {
    FFPROBE_PATH
        .get_or_init(|| resolve_tool("MEDIALIB_FFPROBE_PATH", "ffprobe"))
        .clone()
}

pub fn ffmpeg_path() -> PathBuf {
    FFMPEG_PATH
        .get_or_init(|| resolve_tool("MEDIALIB_FFMPEG_PATH", "ffmpeg"))
        .clone()
}

/// Run a decoder command with a hard deadline. The child is killed on
/// timeout; output pipes are drained from helper threads so a chatty child
/// can never stall on a full pipe.
pub fn run_with_deadline(mut cmd: Command, deadline: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| MediaLibError::DecoderStart(format!("{:?}: {}", cmd.get_program(), e)))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| MediaLibError::DecoderStart("no stdout pipe".into()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| MediaLibError::DecoderStart("no stderr pipe".into()))?;

    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(MediaLibError::DecoderTimeout(format!(
                        "{:?} exceeded {:?}",
                        cmd.get_program(),
                        deadline
                    )));
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stdout_reader.join();
                let _ = stderr_reader.join();
                return Err(MediaLibError::DecoderStart(e.to_string()));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override() {
        let temp_dir = std::env::temp_dir();
        let temp_file = temp_dir.join("medialib_test_tool");
        std::fs::write(&temp_file, "test").ok();

        std::env::set_var("MEDIALIB_TEST_TOOL", temp_file.to_str().unwrap());
        let path = resolve_tool("MEDIALIB_TEST_TOOL", "default");
        assert_eq!(path, temp_file);

        std::env::remove_var("MEDIALIB_TEST_TOOL");
        std::fs::remove_file(&temp_file).ok();
    }

    #[test]
    fn test_resolve_tool_falls_back_to_path() {
        let path = resolve_tool("MEDIALIB_TEST_NONEXISTENT", "testcmd");
        assert!(!path.to_string_lossy().is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_deadline_kills_slow_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let res = run_with_deadline(cmd, Duration::from_millis(100));
        assert!(matches!(res, Err(MediaLibError::DecoderTimeout(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_fast_child_completes() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_with_deadline(cmd, Duration::from_secs(2)).unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    #[cfg(unix)]
    fn test_missing_binary_is_decoder_start() {
        let cmd = Command::new("/nonexistent/decoder-binary");
        let res = run_with_deadline(cmd, Duration::from_secs(1));
        assert!(matches!(res, Err(MediaLibError::DecoderStart(_))));
    }
}
