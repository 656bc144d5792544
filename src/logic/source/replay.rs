//! Log Replay Source
//!
//! Replays a capture log line by line. Two line formats are accepted:
//!
//! ```text
//! 192.168.1.4 10.0.0.7 TCP 51234 443 1200
//! {"src_ip":"192.168.1.4","dst_ip":"10.0.0.7","protocol":"UDP","size":90}
//! ```
//!
//! Blank lines, `#` comments and anything unparseable are skipped.

use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{Emit, Emitter, SourceOutcome, StopSignal};
use crate::logic::error::SourceError;
use crate::logic::event::{PacketInfo, TransportProtocol};

/// Parse one log line; `None` if it is not a packet record
pub fn parse_log_line(line: &str) -> Option<PacketInfo> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if line.starts_with('{') {
        return serde_json::from_str(line).ok();
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 6 {
        return None;
    }

    let protocol = TransportProtocol::parse(parts[2]);
    let src_port: u16 = parts[3].parse().ok()?;
    let dst_port: u16 = parts[4].parse().ok()?;
    let size: u32 = parts[5].parse().ok()?;

    let packet = PacketInfo::new(parts[0], parts[1], protocol, size);
    Some(match protocol {
        TransportProtocol::Icmp => packet,
        _ => packet.with_ports(src_port, dst_port),
    })
}

pub struct ReplaySource {
    path: PathBuf,
}

impl ReplaySource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Lines are read as raw bytes; one that is not UTF-8 is skipped like
    /// any other unparseable line. The pause between records follows the
    /// live `replay_interval_ms`.
    pub async fn run(self, emitter: Emitter, stop: StopSignal) -> SourceOutcome {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                log::error!("Cannot open log file {}: {}", self.path.display(), e);
                return SourceOutcome::Failed(SourceError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        log::info!(
            "Replaying {} ({}ms per line)",
            self.path.display(),
            emitter.snapshot().config.replay_interval_ms
        );
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        let mut replayed = 0u64;
        let mut skipped = 0u64;

        loop {
            if stop.is_set() {
                return SourceOutcome::Cancelled;
            }

            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    return SourceOutcome::Failed(SourceError::Read(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }

            let Some(packet) = std::str::from_utf8(&raw).ok().and_then(parse_log_line) else {
                skipped += 1;
                continue;
            };

            if emitter.emit(packet).await == Emit::Closed {
                return SourceOutcome::Cancelled;
            }
            replayed += 1;

            let interval = emitter.snapshot().config.replay_interval_ms;
            if stop.sleep(Duration::from_millis(interval)).await {
                return SourceOutcome::Cancelled;
            }
        }

        log::info!(
            "Replay of {} complete: {} records, {} skipped lines",
            self.path.display(),
            replayed,
            skipped
        );
        SourceOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::{CaptureConfig, ConfigCell};
    use crate::logic::event::SourceOrigin;
    use std::io::Write;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn fast_replay(path: &std::path::Path) -> Arc<ConfigCell> {
        let mut config = CaptureConfig::logs(path);
        config.replay_interval_ms = 1;
        Arc::new(ConfigCell::new(config))
    }

    #[test]
    fn test_whitespace_format() {
        let packet = parse_log_line("192.168.1.4 10.0.0.7 TCP 51234 22 1200").unwrap();
        assert_eq!(packet.src_ip, "192.168.1.4");
        assert_eq!(packet.protocol, TransportProtocol::Tcp);
        assert_eq!(packet.src_port, Some(51234));
        assert_eq!(packet.dst_port, Some(22));
        assert_eq!(packet.size, 1200);

        // Numeric protocol and trailing columns
        let packet = parse_log_line("1.1.1.1\t2.2.2.2 17 5000 53 80 extra").unwrap();
        assert_eq!(packet.protocol, TransportProtocol::Udp);
    }

    #[test]
    fn test_json_format() {
        let packet = parse_log_line(
            r#"{"src_ip":"1.2.3.4","dst_ip":"5.6.7.8","protocol":"UDP","dst_port":53,"size":90}"#,
        )
        .unwrap();
        assert_eq!(packet.protocol, TransportProtocol::Udp);
        assert_eq!(packet.dst_port, Some(53));
        assert_eq!(packet.src_port, None);
    }

    #[test]
    fn test_garbage_skipped() {
        for line in [
            "",
            "   ",
            "# comment",
            "only three fields",
            "1.1.1.1 2.2.2.2 TCP port 80 100",
            "1.1.1.1 2.2.2.2 TCP 1 80 -5",
            "1.1.1.1 2.2.2.2 TCP 70000 80 100",
            "{not json",
        ] {
            assert!(parse_log_line(line).is_none(), "{:?} should be skipped", line);
        }
    }

    #[tokio::test]
    async fn test_replays_file_then_exhausts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "192.168.1.4 10.0.0.7 TCP 51234 443 1200").unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(file, "192.168.1.5 10.0.0.8 UDP 5353 53 80").unwrap();
        file.flush().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let emitter = Emitter::new(tx, fast_replay(file.path()), SourceOrigin::Logs);
        let source = ReplaySource::new(file.path().to_path_buf());

        let outcome = source.run(emitter, StopSignal::new()).await;
        assert_eq!(outcome, SourceOutcome::Exhausted);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.packet.src_ip, "192.168.xxx.xxx");
        assert_eq!(first.packet.service, "https");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.packet.dst_port, Some(53));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let (tx, _rx) = mpsc::channel(16);
        let cell = Arc::new(ConfigCell::new(CaptureConfig::logs("/nonexistent/capture.log")));
        let emitter = Emitter::new(tx, cell, SourceOrigin::Logs);
        let source = ReplaySource::new("/nonexistent/capture.log".into());

        let outcome = source.run(emitter, StopSignal::new()).await;
        assert!(matches!(outcome, SourceOutcome::Failed(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_undecodable_line_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"192.168.1.4 10.0.0.7 TCP 51234 443 1200\n").unwrap();
        file.write_all(b"\xff\xfe garbage\n").unwrap();
        file.write_all(b"192.168.1.5 10.0.0.8 UDP 5353 53 80").unwrap();
        file.flush().unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let emitter = Emitter::new(tx, fast_replay(file.path()), SourceOrigin::Logs);
        let outcome = ReplaySource::new(file.path().to_path_buf())
            .run(emitter, StopSignal::new())
            .await;
        assert_eq!(outcome, SourceOutcome::Exhausted);

        assert_eq!(rx.recv().await.unwrap().packet.size, 1200);
        // Last line has no trailing newline
        assert_eq!(rx.recv().await.unwrap().packet.size, 80);
        assert!(rx.recv().await.is_none());
    }
}
