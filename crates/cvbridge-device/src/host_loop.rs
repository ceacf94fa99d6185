//! I/O-context orchestration loop.
//!
//! One iteration reads at most one byte, applies any command it completes, then
//! forwards a pending input snapshot. Inbound always precedes outbound within
//! an iteration; the two directions are otherwise unrelated. There are no
//! acknowledgements and no retries.
//!
//! Telemetry writes are bounded by [`HostLoopConfig::write_timeout`]. A host
//! that stops reading costs it telemetry frames, never command handling: a
//! frame the link will not take in time is dropped, like any other
//! overwritten snapshot. A partly written frame is cut short; the host's
//! decoder discards the fragment at the next sync byte.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cvbridge_frame::{encode_telemetry, CommandDecoder, InputSnapshot, OutputTargets};
use cvbridge_transport::ByteTransport;
use tracing::{debug, trace};

use crate::config::{DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use crate::error::Result;
use crate::shared::SharedStateChannel;

/// Host loop settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLoopConfig {
    /// Bounded wait for one inbound byte. Elapsing is not an error.
    pub read_timeout: Duration,
    /// Longest wait for the link to accept a telemetry frame.
    pub write_timeout: Duration,
}

impl Default for HostLoopConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Iteration {
    /// Command applied via `set_targets`, if a frame completed.
    pub command: Option<OutputTargets>,
    /// Snapshot written to the transport, if one was ready and the link
    /// took the whole frame.
    pub telemetry: Option<InputSnapshot>,
    /// A ready snapshot was dropped because the link was backed up.
    pub dropped: bool,
}

/// Counters for one host loop. Diagnostic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostLoopStats {
    pub iterations: u64,
    pub bytes_in: u64,
    pub commands: u64,
    pub telemetry_frames: u64,
    /// Telemetry frames the link did not take within the write timeout.
    pub telemetry_dropped: u64,
}

/// Moves bytes between a transport and the shared state channel.
pub struct HostLoop<T> {
    transport: T,
    channel: Arc<SharedStateChannel>,
    decoder: CommandDecoder,
    config: HostLoopConfig,
    stats: HostLoopStats,
}

impl<T: ByteTransport> HostLoop<T> {
    pub fn new(transport: T, channel: Arc<SharedStateChannel>) -> Self {
        Self::with_config(transport, channel, HostLoopConfig::default())
    }

    pub fn with_config(
        transport: T,
        channel: Arc<SharedStateChannel>,
        config: HostLoopConfig,
    ) -> Self {
        Self {
            transport,
            channel,
            decoder: CommandDecoder::new(),
            config,
            stats: HostLoopStats::default(),
        }
    }

    /// Run one iteration.
    ///
    /// Errors come only from the transport; the decoder and the channel cannot
    /// fail.
    pub fn poll_once(&mut self) -> Result<Iteration> {
        let mut iteration = Iteration::default();
        self.stats.iterations += 1;

        if let Some(byte) = self.transport.read_byte(self.config.read_timeout)? {
            self.stats.bytes_in += 1;
            if let Some(targets) = self.decoder.push(byte) {
                trace!(flags = targets.flags, channels = ?targets.channels, "command applied");
                self.channel.set_targets(&targets);
                self.stats.commands += 1;
                iteration.command = Some(targets);
            }
        }

        if let Some(snapshot) = self.channel.take_snapshot_if_ready() {
            let frame = encode_telemetry(&snapshot);
            let written = self
                .transport
                .write_bounded(&frame, self.config.write_timeout)?;
            if written == frame.len() {
                self.stats.telemetry_frames += 1;
                iteration.telemetry = Some(snapshot);
            } else {
                self.stats.telemetry_dropped += 1;
                iteration.dropped = true;
                trace!(written, "link backed up; telemetry frame dropped");
            }
        }

        Ok(iteration)
    }

    /// Iterate until `running` is cleared or the transport fails.
    pub fn run_while(&mut self, running: &AtomicBool) -> Result<()> {
        debug!(transport = self.transport.transport_name(), "host loop started");
        while running.load(Ordering::Acquire) {
            if let Err(err) = self.poll_once() {
                debug!(error = %err, stats = ?self.stats, "host loop stopped on transport error");
                return Err(err);
            }
        }
        debug!(stats = ?self.stats, "host loop stopped");
        Ok(())
    }

    /// Iterate forever. Returns only on a transport error.
    pub fn run(&mut self) -> Result<Infallible> {
        loop {
            self.poll_once()?;
        }
    }

    pub fn stats(&self) -> HostLoopStats {
        self.stats
    }

    pub fn config(&self) -> &HostLoopConfig {
        &self.config
    }

    /// Bytes of a command currently in flight.
    pub fn pending(&self) -> usize {
        self.decoder.pending()
    }

    pub fn channel(&self) -> &Arc<SharedStateChannel> {
        &self.channel
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Swap in a new transport (e.g. after the host reconnects). Any partial
    /// command from the old link is dropped.
    pub fn replace_transport(&mut self, transport: T) -> T {
        self.decoder.reset();
        std::mem::replace(&mut self.transport, transport)
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T> std::fmt::Debug for HostLoop<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLoop")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::ErrorKind;
    use std::thread;

    use cvbridge_frame::{FrameReader, FrameWriter, COMMAND_SYNC, TELEMETRY_FRAME_LEN};
    use cvbridge_transport::{BridgeStream, TransportError};

    use super::*;
    use crate::error::DeviceError;

    /// Replays scripted reads and records writes.
    #[derive(Default)]
    struct ScriptedTransport {
        reads: VecDeque<Option<u8>>,
        written: Vec<u8>,
        timeouts: Vec<Duration>,
        write_timeouts: Vec<Duration>,
        fail_writes: bool,
        /// Bytes the link still accepts; `None` is unlimited.
        capacity: Option<usize>,
    }

    impl ScriptedTransport {
        fn with_bytes(bytes: &[u8]) -> Self {
            Self {
                reads: bytes.iter().map(|&b| Some(b)).collect(),
                ..Self::default()
            }
        }
    }

    impl ByteTransport for ScriptedTransport {
        fn read_byte(&mut self, timeout: Duration) -> cvbridge_transport::Result<Option<u8>> {
            self.timeouts.push(timeout);
            Ok(self.reads.pop_front().flatten())
        }

        fn write_all(&mut self, buf: &[u8]) -> cvbridge_transport::Result<()> {
            if self.fail_writes {
                return Err(TransportError::Io(std::io::Error::from(ErrorKind::BrokenPipe)));
            }
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn write_bounded(
            &mut self,
            buf: &[u8],
            timeout: Duration,
        ) -> cvbridge_transport::Result<usize> {
            self.write_timeouts.push(timeout);
            if self.fail_writes {
                return Err(TransportError::Io(std::io::Error::from(ErrorKind::BrokenPipe)));
            }
            let n = self.capacity.map_or(buf.len(), |cap| cap.min(buf.len()));
            if let Some(cap) = self.capacity.as_mut() {
                *cap -= n;
            }
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn transport_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn snapshot() -> InputSnapshot {
        InputSnapshot {
            flags: 0b0110,
            cv: [100, -50],
            audio: [0, 0],
            controls: [4095, 0, 2048],
        }
    }

    #[test]
    fn idle_iteration_is_not_an_error() {
        let channel = Arc::new(SharedStateChannel::new());
        let mut host = HostLoop::new(ScriptedTransport::default(), channel);

        assert_eq!(host.poll_once().unwrap(), Iteration::default());
        assert_eq!(host.transport().timeouts, vec![DEFAULT_READ_TIMEOUT]);
        assert!(host.transport().written.is_empty());
    }

    #[test]
    fn complete_command_sets_targets() {
        let channel = Arc::new(SharedStateChannel::new());
        let frame = [COMMAND_SYNC, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0, 0];
        let mut host = HostLoop::new(ScriptedTransport::with_bytes(&frame), Arc::clone(&channel));

        for _ in 0..frame.len() - 1 {
            assert_eq!(host.poll_once().unwrap().command, None);
            assert_eq!(channel.read_targets(), OutputTargets::ZERO);
        }
        let iteration = host.poll_once().unwrap();
        let expected = OutputTargets::new(0, [2048, 0, 0, 0]);
        assert_eq!(iteration.command, Some(expected));
        assert_eq!(channel.read_targets(), expected);
        assert_eq!(host.stats().commands, 1);
        assert_eq!(host.stats().bytes_in, 10);
    }

    #[test]
    fn ready_snapshot_is_written_once() {
        let channel = Arc::new(SharedStateChannel::new());
        channel.publish_snapshot(&snapshot());
        let mut host = HostLoop::new(ScriptedTransport::default(), Arc::clone(&channel));

        let iteration = host.poll_once().unwrap();
        assert_eq!(iteration.telemetry, Some(snapshot()));
        assert_eq!(host.transport().written, encode_telemetry(&snapshot()).to_vec());

        host.poll_once().unwrap();
        assert_eq!(host.transport().written.len(), TELEMETRY_FRAME_LEN);
    }

    #[test]
    fn inbound_precedes_outbound_in_one_iteration() {
        let channel = Arc::new(SharedStateChannel::new());
        let frame = OutputTargets::new(1, [1, 2, 3, 4]).to_frame();
        let mut host = HostLoop::new(ScriptedTransport::with_bytes(&frame), Arc::clone(&channel));
        for _ in 0..frame.len() - 1 {
            host.poll_once().unwrap();
        }

        channel.publish_snapshot(&snapshot());
        let iteration = host.poll_once().unwrap();
        assert!(iteration.command.is_some());
        assert!(iteration.telemetry.is_some());
    }

    #[test]
    fn backed_up_link_drops_frame_and_keeps_going() {
        let channel = Arc::new(SharedStateChannel::new());
        let transport = ScriptedTransport {
            capacity: Some(TELEMETRY_FRAME_LEN + 5),
            ..ScriptedTransport::default()
        };
        let mut host = HostLoop::new(transport, Arc::clone(&channel));

        channel.publish_snapshot(&snapshot());
        assert_eq!(host.poll_once().unwrap().telemetry, Some(snapshot()));

        channel.publish_snapshot(&snapshot());
        let iteration = host.poll_once().unwrap();
        assert_eq!(iteration.telemetry, None);
        assert!(iteration.dropped);

        channel.publish_snapshot(&snapshot());
        assert!(host.poll_once().unwrap().dropped);

        let stats = host.stats();
        assert_eq!(stats.telemetry_frames, 1);
        assert_eq!(stats.telemetry_dropped, 2);
        assert_eq!(host.transport().written.len(), TELEMETRY_FRAME_LEN + 5);
        assert_eq!(
            host.transport().write_timeouts,
            vec![DEFAULT_WRITE_TIMEOUT; 3]
        );
    }

    #[test]
    fn commands_still_apply_when_host_never_reads() {
        let (card_end, host_end) = BridgeStream::pair().unwrap();
        let channel = Arc::new(SharedStateChannel::new());
        let mut host = HostLoop::new(card_end, Arc::clone(&channel));

        // Far more telemetry than any socket buffer holds.
        let start = std::time::Instant::now();
        for _ in 0..200_000 {
            channel.publish_snapshot(&snapshot());
            host.poll_once().unwrap();
            if host.stats().telemetry_dropped > 0 {
                break;
            }
        }
        assert!(host.stats().telemetry_dropped > 0, "link never backed up");
        assert!(start.elapsed() < Duration::from_secs(10));

        let targets = OutputTargets::new(0x01, [5, 6, 7, 8]);
        let mut writer = FrameWriter::new(host_end);
        writer.send_command(&targets).unwrap();

        let start = std::time::Instant::now();
        while channel.read_targets() != targets {
            assert!(start.elapsed() < Duration::from_secs(5), "command not applied");
            channel.publish_snapshot(&snapshot());
            let began = std::time::Instant::now();
            host.poll_once().unwrap();
            assert!(began.elapsed() < Duration::from_secs(1));
        }
    }

    #[test]
    fn write_failure_propagates() {
        let channel = Arc::new(SharedStateChannel::new());
        channel.publish_snapshot(&snapshot());
        let transport = ScriptedTransport {
            fail_writes: true,
            ..ScriptedTransport::default()
        };
        let mut host = HostLoop::new(transport, channel);

        let err = host.poll_once().unwrap_err();
        assert!(err.is_disconnect());
        assert!(matches!(err, DeviceError::Transport(_)));
    }

    #[test]
    fn replace_transport_drops_partial_command() {
        let channel = Arc::new(SharedStateChannel::new());
        let frame = OutputTargets::new(0, [7; 4]).to_frame();
        let mut host = HostLoop::new(ScriptedTransport::with_bytes(&frame[..4]), channel);
        for _ in 0..4 {
            host.poll_once().unwrap();
        }
        assert_eq!(host.pending(), 4);

        let old = host.replace_transport(ScriptedTransport::with_bytes(&frame[4..]));
        assert!(old.reads.is_empty());
        assert_eq!(host.pending(), 0);
        for _ in 0..6 {
            assert_eq!(host.poll_once().unwrap().command, None);
        }
    }

    #[test]
    fn run_while_stops_when_flag_clears() {
        let channel = Arc::new(SharedStateChannel::new());
        let mut host = HostLoop::new(ScriptedTransport::default(), channel);
        let running = AtomicBool::new(false);
        host.run_while(&running).unwrap();
        assert_eq!(host.stats().iterations, 0);
    }

    #[test]
    fn run_returns_transport_error() {
        let channel = Arc::new(SharedStateChannel::new());
        channel.publish_snapshot(&snapshot());
        let transport = ScriptedTransport {
            fail_writes: true,
            ..ScriptedTransport::default()
        };
        let mut host = HostLoop::new(transport, channel);
        assert!(host.run().is_err());
    }

    #[test]
    fn exchanges_frames_over_stream_pair() {
        let (card_end, host_end) = BridgeStream::pair().unwrap();
        let channel = Arc::new(SharedStateChannel::new());
        let running = Arc::new(AtomicBool::new(true));

        let card = {
            let channel = Arc::clone(&channel);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut host = HostLoop::new(card_end, channel);
                host.run_while(&running).map(|()| host.stats())
            })
        };

        let (reader_end, writer_end) = {
            let stream = host_end;
            let clone = stream.try_clone().unwrap();
            (stream, clone)
        };
        let mut writer = FrameWriter::new(writer_end);
        let mut reader = FrameReader::new(reader_end);

        let targets = OutputTargets::new(0x03, [-1, 2, -3, 4]);
        writer.send_command(&targets).unwrap();
        let start = std::time::Instant::now();
        while channel.read_targets() != targets {
            assert!(start.elapsed() < Duration::from_secs(5), "command not applied");
            thread::yield_now();
        }

        channel.publish_snapshot(&snapshot());
        assert_eq!(reader.read_telemetry().unwrap(), snapshot());

        running.store(false, Ordering::Release);
        let stats = card.join().unwrap().unwrap();
        assert_eq!(stats.commands, 1);
        assert_eq!(stats.telemetry_frames, 1);
    }
}
