//! Worker stderr classification
//!
//! Browser engines in headless containers emit a steady trickle of harmless
//! complaints. Each line is bucketed so operational logs stay signal-rich:
//! structured informational tags at INFO, known-harmless sandbox noise at
//! DEBUG, everything else at WARN. Nothing is dropped outright.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Log level bucket for one stderr line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrClass {
    /// Structured informational output from the worker itself
    Info,
    /// Known-harmless sandbox/container noise
    Noise,
    /// Anything unrecognized, kept visible
    Other,
}

/// Substrings of stderr lines that are harmless in headless containers
const NOISE_MARKERS: &[&str] = &[
    // D-Bus is absent in containers
    "Failed to connect to the bus",
    "Could not parse server address",
    // file-watch limits
    "inotify_add_watch",
    "inotify watch limit",
    "ENOSPC",
    // GPU and sandbox warnings under headless
    "GPU process",
    "gpu_init",
    "SwiftShader",
    "SUID sandbox",
    "--no-sandbox",
    // font configuration
    "Fontconfig",
    // shared memory
    "/dev/shm",
    // audio subsystem
    "ALSA lib",
    "PulseAudio",
    "pulseaudio",
    // accessibility bridge
    "AT-SPI",
    "atk-bridge",
    "accessibility bus",
];

/// Bucket one stderr line
pub fn classify_line(line: &str) -> StderrClass {
    let trimmed = line.trim();
    if info_tag(trimmed).is_some() {
        return StderrClass::Info;
    }
    if NOISE_MARKERS.iter().any(|marker| trimmed.contains(marker)) {
        return StderrClass::Noise;
    }
    StderrClass::Other
}

/// Extract the worker's structured tag, e.g. `[browser-worker] ready`
///
/// Engine log lines also start with a bracket but carry pid/timestamp
/// prefixes ("[7034:7034:0825/...]"), so the tag must be a plain identifier.
fn info_tag(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.find(']')?;
    let tag = &rest[..end];

    let mut chars = tag.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Some(tag)
    } else {
        None
    }
}

/// Drain worker stderr until EOF, logging each line at its bucket's level
pub fn spawn_drain<R>(stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match classify_line(trimmed) {
                        StderrClass::Info => info!("worker: {}", trimmed),
                        StderrClass::Noise => debug!("worker: {}", trimmed),
                        StderrClass::Other => warn!("worker: {}", trimmed),
                    }
                }
                Err(e) => {
                    debug!(error = %e, "worker stderr read failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_ready_marker_is_informational() {
        assert_eq!(
            classify_line("[browser-worker] ready on stdio"),
            StderrClass::Info
        );
    }

    #[test]
    fn test_dbus_absence_is_noise() {
        assert_eq!(
            classify_line("Failed to connect to the bus: Could not parse server address"),
            StderrClass::Noise
        );
    }

    #[test]
    fn test_file_watch_limit_is_noise() {
        assert_eq!(
            classify_line("inotify_add_watch(/proc/self/fd) failed: No space left on device"),
            StderrClass::Noise
        );
        assert_eq!(classify_line("watch failed: ENOSPC"), StderrClass::Noise);
    }

    #[test]
    fn test_headless_sandbox_warnings_are_noise() {
        assert_eq!(
            classify_line("Fontconfig error: Cannot load default config file"),
            StderrClass::Noise
        );
        assert_eq!(
            classify_line("Falling back to /tmp instead of /dev/shm"),
            StderrClass::Noise
        );
        assert_eq!(
            classify_line("ALSA lib confmisc.c:767:(parse_card) cannot find card '0'"),
            StderrClass::Noise
        );
        assert_eq!(
            classify_line("Couldn't connect to accessibility bus: org.a11y.Bus not provided"),
            StderrClass::Noise
        );
    }

    #[test]
    fn test_engine_log_prefix_is_not_a_tag() {
        // Engine lines start with pid:tid prefixes, not plain tags.
        assert_eq!(
            classify_line("[7034:7034:0825/120000.123456:ERROR:socket_posix.cc(27)] connect() failed"),
            StderrClass::Other
        );
    }

    #[test]
    fn test_unknown_lines_stay_visible() {
        assert_eq!(
            classify_line("Error: something unexpected exploded"),
            StderrClass::Other
        );
    }

    #[tokio::test]
    async fn test_drain_runs_to_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let handle = spawn_drain(reader);

        writer.write_all(b"[browser-worker] ready\n").await.unwrap();
        writer
            .write_all(b"Fontconfig error: Cannot load default config file\n")
            .await
            .unwrap();
        drop(writer);

        handle.await.unwrap();
    }
}
