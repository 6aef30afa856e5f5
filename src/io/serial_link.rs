//! Serial link to the gate controller
//!
//! One reader task owns the read half and forwards trimmed lines to the event
//! router. Writers share the write half through an async mutex, so commands
//! go out one at a time. Any read or write I/O error drops the connection;
//! the reader then reconnects with a fixed delay, forever.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::protocol::Command;
use async_trait::async_trait;
use bytes::BytesMut;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

/// Lines longer than this without a terminator are discarded as noise
const MAX_LINE_LEN: usize = 512;

/// Log connection failure (cold path)
#[cold]
fn log_connect_failed(device: &str, attempt: u64, e: &std::io::Error) {
    warn!(device = %device, attempt = attempt, error = %e, "serial_connect_failed");
}

/// Log read error (cold path)
#[cold]
fn log_read_error(e: &std::io::Error) {
    error!(error = %e, "serial_read_error");
}

/// Log write error (cold path)
#[cold]
fn log_write_error(e: &std::io::Error) {
    error!(error = %e, "serial_write_error");
}

/// Log write timeout (cold path)
#[cold]
fn log_write_timeout() {
    error!("serial_write_timeout");
}

/// Opens the physical (or simulated) byte stream to the controller
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn open(&self) -> std::io::Result<Self::Stream>;

    /// Human-readable device name for logs
    fn describe(&self) -> &str;
}

/// Connector for a real serial port
pub struct SerialConnector {
    device: String,
    baud: u32,
}

impl SerialConnector {
    pub fn new(device: &str, baud: u32) -> Self {
        Self { device: device.to_string(), baud }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.serial_device(), config.serial_baud())
    }
}

#[async_trait]
impl LinkConnector for SerialConnector {
    type Stream = tokio_serial::SerialStream;

    async fn open(&self) -> std::io::Result<Self::Stream> {
        tokio_serial::new(&self.device, self.baud).open_native_async().map_err(std::io::Error::from)
    }

    fn describe(&self) -> &str {
        &self.device
    }
}

/// Anything that can push a command to the gate controller.
///
/// Returns false when the link is down or the write failed; never an error.
#[async_trait]
pub trait GateCommander: Send + Sync {
    async fn send_command(&self, cmd: Command) -> bool;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub reconnect_delay: Duration,
    pub boot_delay: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            boot_delay: Duration::from_secs(2),
        }
    }
}

impl LinkSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.serial_read_timeout(),
            write_timeout: config.serial_write_timeout(),
            reconnect_delay: config.serial_reconnect_delay(),
            boot_delay: config.serial_boot_delay(),
        }
    }
}

/// Result of one `read_frame` call
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete, trimmed, non-empty line
    Line(String),
    /// Read timeout elapsed without a complete line
    NoData,
    /// EOF or I/O error; the connection must be re-established
    LinkError,
}

/// Newline framer over the read half of the link
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, read_timeout: Duration) -> Self {
        Self { inner, buf: BytesMut::with_capacity(MAX_LINE_LEN), read_timeout }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let raw = self.buf.split_to(pos + 1);
        if pos > MAX_LINE_LEN {
            debug!(discarded = pos, "serial_overlong_line_discarded");
            return Some(String::new());
        }
        Some(String::from_utf8_lossy(&raw[..pos]).trim().to_string())
    }

    /// Read the next line, waiting at most `read_timeout` per read.
    ///
    /// Cancel-safe: buffered bytes survive a dropped future.
    pub async fn read_frame(&mut self) -> ReadOutcome {
        let mut chunk = [0u8; 256];
        loop {
            while let Some(line) = self.take_line() {
                if !line.is_empty() {
                    return ReadOutcome::Line(line);
                }
            }

            match tokio::time::timeout(self.read_timeout, self.inner.read(&mut chunk)).await {
                Err(_) => return ReadOutcome::NoData,
                Ok(Ok(0)) => {
                    warn!("serial_eof");
                    return ReadOutcome::LinkError;
                }
                Ok(Ok(n)) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&b'\n') {
                        debug!(discarded = self.buf.len(), "serial_overlong_line_discarded");
                        self.buf.clear();
                    }
                }
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => return ReadOutcome::NoData,
                Ok(Err(e)) => {
                    log_read_error(&e);
                    return ReadOutcome::LinkError;
                }
            }
        }
    }
}

pub struct SerialLink<C: LinkConnector> {
    connector: C,
    settings: LinkSettings,
    writer: Mutex<Option<WriteHalf<C::Stream>>>,
    connected: AtomicBool,
    /// Wakes the reader when a writer tears the connection down
    teardown: Notify,
    metrics: Arc<Metrics>,
}

impl<C: LinkConnector> SerialLink<C> {
    pub fn new(connector: C, settings: LinkSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            connector,
            settings,
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            teardown: Notify::new(),
            metrics,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the link, retrying with a fixed delay until it succeeds.
    ///
    /// Returns `None` only when shutdown is signalled.
    pub async fn connect(&self, shutdown: &mut watch::Receiver<bool>) -> Option<C::Stream> {
        let mut attempt: u64 = 0;
        loop {
            if *shutdown.borrow() {
                return None;
            }

            match self.connector.open().await {
                Ok(stream) => {
                    info!(device = %self.connector.describe(), attempts = attempt + 1, "serial_connected");
                    return Some(stream);
                }
                Err(e) => {
                    attempt += 1;
                    log_connect_failed(self.connector.describe(), attempt, &e);
                    if !self.pause(shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for the reconnect delay; false if shutdown arrived meanwhile
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.reconnect_delay) => true,
            res = shutdown.changed() => res.is_ok() && !*shutdown.borrow(),
        }
    }

    /// Reader loop: connect, forward lines, reconnect on failure
    pub async fn run(self: Arc<Self>, frame_tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
        info!(
            device = %self.connector.describe(),
            read_timeout_ms = %self.settings.read_timeout.as_millis(),
            reconnect_delay_ms = %self.settings.reconnect_delay.as_millis(),
            "serial_link_started"
        );

        let mut sessions: u64 = 0;
        loop {
            let Some(stream) = self.connect(&mut shutdown).await else {
                break;
            };
            if sessions > 0 {
                self.metrics.record_reconnect();
            }
            sessions += 1;

            let (read_half, write_half) = tokio::io::split(stream);
            self.attach(write_half).await;
            self.spawn_boot_query();

            let mut reader = FrameReader::new(read_half, self.settings.read_timeout);
            let keep_running = self.pump(&mut reader, &frame_tx, &mut shutdown).await;
            self.detach().await;

            if !keep_running || !self.pause(&mut shutdown).await {
                break;
            }
        }

        info!("serial_link_shutdown");
    }

    /// Forward lines until the link breaks (true) or we must stop (false)
    async fn pump(
        &self,
        reader: &mut FrameReader<ReadHalf<C::Stream>>,
        frame_tx: &mpsc::Sender<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            if !self.is_connected() {
                warn!("serial_link_torn_down");
                return true;
            }

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
                _ = self.teardown.notified() => {
                    warn!("serial_link_torn_down");
                    return true;
                }
                outcome = reader.read_frame() => {
                    match outcome {
                        ReadOutcome::Line(line) => {
                            self.metrics.record_frame();
                            debug!(line = %line, "serial_rx");
                            if frame_tx.send(line).await.is_err() {
                                info!("serial_frame_channel_closed");
                                return false;
                            }
                        }
                        ReadOutcome::NoData => {}
                        ReadOutcome::LinkError => return true,
                    }
                }
            }
        }
    }

    async fn attach(&self, write_half: WriteHalf<C::Stream>) {
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Release);
    }

    async fn detach(&self) {
        self.connected.store(false, Ordering::Release);
        *self.writer.lock().await = None;
        info!(device = %self.connector.describe(), "serial_disconnected");
    }

    /// The controller reboots when the port opens; seed sensor state once it is up
    fn spawn_boot_query(self: &Arc<Self>) {
        let link = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(link.settings.boot_delay).await;
            if link.is_connected() {
                link.send_command(Command::Sensors).await;
            }
        });
    }

    /// Write one command frame. False if disconnected or the write failed.
    pub async fn send_command(&self, cmd: Command) -> bool {
        let mut writer = self.writer.lock().await;
        let Some(write_half) = writer.as_mut() else {
            warn!(cmd = %cmd, "serial_not_connected");
            self.metrics.record_command(false);
            return false;
        };

        let frame = cmd.frame();
        let result = tokio::time::timeout(self.settings.write_timeout, async {
            write_half.write_all(frame.as_bytes()).await?;
            write_half.flush().await
        })
        .await;

        let ok = match result {
            Ok(Ok(())) => {
                info!(cmd = %cmd, "serial_tx");
                true
            }
            Ok(Err(e)) => {
                log_write_error(&e);
                false
            }
            Err(_) => {
                log_write_timeout();
                false
            }
        };

        if !ok {
            *writer = None;
            self.connected.store(false, Ordering::Release);
            self.teardown.notify_waiters();
        }
        self.metrics.record_command(ok);
        ok
    }
}

#[async_trait]
impl<C: LinkConnector> GateCommander for SerialLink<C> {
    async fn send_command(&self, cmd: Command) -> bool {
        SerialLink::send_command(self, cmd).await
    }

    fn is_connected(&self) -> bool {
        SerialLink::is_connected(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    /// Connector handing out pre-queued in-memory streams
    #[derive(Clone, Default)]
    pub(crate) struct DuplexConnector {
        streams: Arc<parking_lot::Mutex<VecDeque<DuplexStream>>>,
    }

    impl DuplexConnector {
        /// Queue a new connection; returns the controller side
        pub(crate) fn push(&self) -> DuplexStream {
            let (ours, theirs) = tokio::io::duplex(1024);
            self.streams.lock().push_back(ours);
            theirs
        }
    }

    #[async_trait]
    impl LinkConnector for DuplexConnector {
        type Stream = DuplexStream;

        async fn open(&self) -> std::io::Result<DuplexStream> {
            self.streams
                .lock()
                .pop_front()
                .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "no device"))
        }

        fn describe(&self) -> &str {
            "duplex"
        }
    }

    pub(crate) fn fast_settings() -> LinkSettings {
        LinkSettings {
            read_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(10),
            boot_delay: Duration::from_secs(3600),
        }
    }

    pub(crate) async fn wait_connected<C: LinkConnector>(link: &SerialLink<C>, up: bool) {
        for _ in 0..200 {
            if link.is_connected() == up {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("link never reached connected={}", up);
    }

    #[tokio::test]
    async fn test_reader_splits_and_trims_lines() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(ours, Duration::from_millis(50));

        peer.write_all(b"EVENT:GATE_OPENED\r\n\n  EVENT:BEAM:ENTRY:LOW \n").await.unwrap();

        assert_eq!(reader.read_frame().await, ReadOutcome::Line("EVENT:GATE_OPENED".into()));
        assert_eq!(reader.read_frame().await, ReadOutcome::Line("EVENT:BEAM:ENTRY:LOW".into()));
        assert_eq!(reader.read_frame().await, ReadOutcome::NoData);
    }

    #[tokio::test]
    async fn test_reader_joins_partial_lines() {
        let (mut peer, ours) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(ours, Duration::from_millis(50));

        peer.write_all(b"INFO:SENSORS:ENTRY:").await.unwrap();
        assert_eq!(reader.read_frame().await, ReadOutcome::NoData);

        peer.write_all(b"LOW:EXIT:HIGH\n").await.unwrap();
        assert_eq!(
            reader.read_frame().await,
            ReadOutcome::Line("INFO:SENSORS:ENTRY:LOW:EXIT:HIGH".into())
        );
    }

    #[tokio::test]
    async fn test_reader_reports_eof_as_link_error() {
        let (peer, ours) = tokio::io::duplex(256);
        let mut reader = FrameReader::new(ours, Duration::from_millis(50));
        drop(peer);
        assert_eq!(reader.read_frame().await, ReadOutcome::LinkError);
    }

    #[tokio::test]
    async fn test_reader_discards_overlong_garbage() {
        let (mut peer, ours) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(ours, Duration::from_millis(50));

        peer.write_all(&[b'x'; MAX_LINE_LEN + 10]).await.unwrap();
        peer.write_all(b"\nEVENT:GATE_CLOSED\n").await.unwrap();

        let mut lines = Vec::new();
        while let ReadOutcome::Line(line) = reader.read_frame().await {
            lines.push(line);
        }
        assert_eq!(lines.last().map(String::as_str), Some("EVENT:GATE_CLOSED"));
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_LEN));
    }

    #[tokio::test]
    async fn test_send_command_when_disconnected() {
        let link = SerialLink::new(DuplexConnector::default(), fast_settings(), Arc::new(Metrics::new()));
        assert!(!link.send_command(Command::Open).await);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_run_forwards_lines_and_writes_commands() {
        let connector = DuplexConnector::default();
        let peer = connector.push();
        let metrics = Arc::new(Metrics::new());
        let link = Arc::new(SerialLink::new(connector, fast_settings(), metrics.clone()));

        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(link.clone().run(frame_tx, shutdown_rx));
        wait_connected(&link, true).await;

        let (peer_rd, mut peer_wr) = tokio::io::split(peer);
        peer_wr.write_all(b"EVENT:GATE_OPENED\n").await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(1), frame_rx.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("EVENT:GATE_OPENED"));

        assert!(link.send_command(Command::Open).await);
        let mut peer_lines = BufReader::new(peer_rd).lines();
        let sent = tokio::time::timeout(Duration::from_secs(1), peer_lines.next_line()).await.unwrap();
        assert_eq!(sent.unwrap().as_deref(), Some("CMD:OPEN"));
        assert_eq!(metrics.commands_sent(), 1);
        assert_eq!(metrics.frames_rx(), 1);
    }

    #[tokio::test]
    async fn test_boot_query_after_connect() {
        let connector = DuplexConnector::default();
        let peer = connector.push();
        let settings = LinkSettings { boot_delay: Duration::from_millis(10), ..fast_settings() };
        let link = Arc::new(SerialLink::new(connector, settings, Arc::new(Metrics::new())));

        let (frame_tx, _frame_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(link.clone().run(frame_tx, shutdown_rx));

        let mut peer_lines = BufReader::new(peer).lines();
        let sent = tokio::time::timeout(Duration::from_secs(1), peer_lines.next_line()).await.unwrap();
        assert_eq!(sent.unwrap().as_deref(), Some("CMD:SENSORS"));
    }

    #[tokio::test]
    async fn test_reconnects_after_link_drop() {
        let connector = DuplexConnector::default();
        let first = connector.push();
        let metrics = Arc::new(Metrics::new());
        let link = Arc::new(SerialLink::new(connector.clone(), fast_settings(), metrics.clone()));

        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(link.clone().run(frame_tx, shutdown_rx));
        wait_connected(&link, true).await;

        // Controller power-cycled: link drops, commands report offline
        drop(first);
        wait_connected(&link, false).await;
        assert!(!link.send_command(Command::Open).await);

        // Device comes back; the retry loop picks it up
        let mut second = connector.push();
        wait_connected(&link, true).await;
        second.write_all(b"EVENT:GATE_CLOSED\n").await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(1), frame_rx.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("EVENT:GATE_CLOSED"));
        assert_eq!(metrics.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_connect_retries() {
        let link = Arc::new(SerialLink::new(
            DuplexConnector::default(),
            fast_settings(),
            Arc::new(Metrics::new()),
        ));
        let (frame_tx, _frame_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(link.clone().run(frame_tx, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
