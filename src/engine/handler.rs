use super::ListenerOracle;
use super::status::{CloseCause, SharedStatus};
use crate::config::{Mode, TcpConfig};
use crate::timing::{self, TimeoutKind};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scratch read size for modes that do not need a specific one
pub(crate) const READ_BUFFER_SIZE: usize = 1024;

/// Drives one accepted connection through its mode loop
///
/// The handler owns the stream and a private copy of the port config; the
/// status is shared read-only with the history and the active registry.
pub struct ConnectionHandler<S> {
    pub(super) stream: S,
    pub(super) config: TcpConfig,
    pub(super) status: SharedStatus,
    port: u16,
    listener_id: String,
    host_label: String,
    oracle: Arc<dyn ListenerOracle>,
    cancel: CancellationToken,
    started: Instant,
    life: Duration,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        config: TcpConfig,
        status: SharedStatus,
        oracle: Arc<dyn ListenerOracle>,
        cancel: CancellationToken,
    ) -> Self {
        let (port, listener_id) = {
            let status = status.lock();
            (status.port, status.listener_id.clone())
        };
        let life = config.effective_connection_life();
        Self {
            stream,
            host_label: oracle.host_label(port),
            config,
            status,
            port,
            listener_id,
            oracle,
            cancel,
            started: Instant::now(),
            life,
        }
    }

    /// Runs the mode loop chosen at configuration time, then closes.
    pub async fn run(mut self) -> SharedStatus {
        let mode = self.config.mode;
        info!(mode = %mode, life = ?self.life, "Serving connection");

        let outcome = match mode {
            Mode::Echo => self.run_echo().await,
            Mode::ResponsePayload => self.run_response_payloads().await,
            Mode::Stream => self.run_stream().await,
            Mode::Conversation => self.run_conversation().await,
            Mode::PayloadValidation => self.run_payload_validation().await,
            Mode::SilentLife => self.run_silent_life().await,
            Mode::CloseAtFirstByte => self.run_close_at_first_byte().await,
        };

        let cause = outcome.err().unwrap_or(CloseCause::ServerClosed);
        self.close(cause).await;
        self.status
    }

    async fn close(&mut self, cause: CloseCause) {
        match &cause {
            CloseCause::ClientClosed | CloseCause::ServerClosed => {
                info!(cause = %cause, "Connection closing")
            }
            CloseCause::Io(e) => warn!(error = %e, "Connection failed"),
            _ => info!(cause = %cause, elapsed = ?self.started.elapsed(), "Connection timed out"),
        }
        // A peer that stalled a write would stall the shutdown too
        if !matches!(
            cause,
            CloseCause::ClientClosed | CloseCause::WriteTimeout | CloseCause::Io(_)
        ) {
            let _ = timeout(self.config.timings.write_timeout, self.stream.shutdown()).await;
        }
        let status = {
            let mut status = self.status.lock();
            status.record_close(&cause);
            status.clone()
        };
        debug!(
            bytes_read = status.total_bytes_read,
            bytes_sent = status.total_bytes_sent,
            reads = status.total_reads,
            writes = status.total_writes,
            "Connection closed"
        );
    }

    pub(super) fn remaining_life(&self) -> Option<Duration> {
        timing::remaining_life(self.life, self.started.elapsed())
    }

    pub(super) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(super) fn force_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is force-closed
    pub(super) fn cancelled(&self) -> impl Future<Output = ()> + Send + '_ {
        self.cancel.cancelled()
    }

    /// Polled at every loop boundary: local close, forced close, listener
    /// closed or replaced, or life expired.
    pub(super) fn closing_cause(&self) -> Option<CloseCause> {
        if self.status.lock().closed || self.cancel.is_cancelled() {
            return Some(CloseCause::ServerClosed);
        }
        if !self.oracle.is_listener_open(self.port)
            || self.oracle.listener_id(self.port) != self.listener_id
        {
            debug!(listener_id = %self.listener_id, "Listener closed or replaced");
            return Some(CloseCause::ServerClosed);
        }
        if self.remaining_life().is_some_and(|r| r.is_zero()) {
            return Some(CloseCause::LifeTimeout);
        }
        None
    }

    /// Flags a cause on the status while the connection keeps going
    pub(super) fn record_cause(&self, cause: &CloseCause) {
        self.status.lock().record_cause(cause);
    }

    fn timeout_cause(&self, op_timeout: Duration, writing: bool) -> CloseCause {
        let kind = timing::classify_timeout(
            self.remaining_life(),
            op_timeout,
            self.config.timings.idle_timeout,
        );
        match kind {
            TimeoutKind::Life => CloseCause::LifeTimeout,
            TimeoutKind::Idle => CloseCause::IdleTimeout,
            TimeoutKind::Operation if writing => CloseCause::WriteTimeout,
            TimeoutKind::Operation => CloseCause::ReadTimeout,
        }
    }

    fn read_deadline(&self) -> Option<Duration> {
        timing::io_deadline(
            self.remaining_life(),
            self.config.timings.read_timeout,
            self.config.timings.idle_timeout,
        )
    }

    fn write_deadline(&self) -> Option<Duration> {
        timing::io_deadline(
            self.remaining_life(),
            self.config.timings.write_timeout,
            self.config.timings.idle_timeout,
        )
    }

    /// Reads once, bounded by the remaining life and the read/idle timeouts
    pub(super) async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CloseCause> {
        let deadline = self.read_deadline();
        self.read_within(buf, deadline).await
    }

    /// Reads once with an explicit bound; `None` waits indefinitely
    pub(super) async fn read_within(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Duration>,
    ) -> Result<usize, CloseCause> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CloseCause::ServerClosed),
            result = bounded(deadline, self.stream.read(buf)) => result,
        };

        match result {
            None => Err(self.timeout_cause(self.config.timings.read_timeout, false)),
            Some(Ok(0)) if !buf.is_empty() => Err(CloseCause::ClientClosed),
            Some(Ok(n)) => {
                self.status.lock().record_read(n);
                debug!(size = n, "Read data");
                Ok(n)
            }
            Some(Err(e)) => Err(classify_io_error(e)),
        }
    }

    /// Writes and flushes `data`, bounded by the remaining life and the
    /// write/idle timeouts
    pub(super) async fn write(&mut self, data: &[u8]) -> Result<(), CloseCause> {
        let deadline = self.write_deadline();
        self.write_within(data, deadline).await
    }

    /// Writes a closing message; only the write timeout applies since the
    /// connection is already on its way out
    pub(super) async fn write_final(&mut self, data: &[u8]) -> Result<(), CloseCause> {
        let write_timeout = self.config.timings.write_timeout;
        let deadline = (!write_timeout.is_zero()).then_some(write_timeout);
        self.write_within(data, deadline).await
    }

    async fn write_within(
        &mut self,
        data: &[u8],
        deadline: Option<Duration>,
    ) -> Result<(), CloseCause> {
        let stream = &mut self.stream;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CloseCause::ServerClosed),
            result = bounded(deadline, async move {
                stream.write_all(data).await?;
                stream.flush().await
            }) => result,
        };

        match result {
            None => Err(self.timeout_cause(self.config.timings.write_timeout, true)),
            Some(Ok(())) => {
                self.status.lock().record_write(data.len());
                debug!(size = data.len(), "Wrote data");
                Ok(())
            }
            Some(Err(e)) => Err(classify_io_error(e)),
        }
    }

    /// `[<host>]<message>`
    pub(super) fn labeled(&self, message: &str) -> String {
        format!("[{}]{}\n", self.host_label, message)
    }

    /// Sends a host-labeled protocol line
    pub(super) async fn send_message(&mut self, message: &str) -> Result<(), CloseCause> {
        let line = self.labeled(message);
        self.write(line.as_bytes()).await
    }

    /// Sleeps for `delay`, cut short by the end of the connection life.
    ///
    /// Returns `false` if the connection was force-closed meanwhile.
    pub(super) async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        let delay = self.remaining_life().map_or(delay, |r| delay.min(r));
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}

async fn bounded<F, T>(deadline: Option<Duration>, operation: F) -> Option<io::Result<T>>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => timeout(deadline, operation).await.ok(),
        None => Some(operation.await),
    }
}

fn classify_io_error(e: io::Error) -> CloseCause {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => CloseCause::ClientClosed,
        _ => CloseCause::Io(e),
    }
}
