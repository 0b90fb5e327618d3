use crate::engine::handler::{ConnectionHandler, READ_BUFFER_SIZE};
use crate::engine::status::CloseCause;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Swallows input without replying until the connection is closing, then
    /// reports how many bytes arrived.
    ///
    /// Read and idle timeouts do not end a silent connection; only its life,
    /// a forced close, the listener going away, or the client does.
    pub(crate) async fn run_silent_life(&mut self) -> Result<(), CloseCause> {
        let mut scratch = vec![0u8; READ_BUFFER_SIZE];

        let cause = loop {
            if let Some(cause) = self.closing_cause() {
                break cause;
            }
            match self.read(&mut scratch).await {
                Ok(_) => {}
                Err(CloseCause::ReadTimeout | CloseCause::IdleTimeout) => {
                    debug!("Silent connection still waiting");
                }
                Err(cause) => break cause,
            }
        };

        if matches!(cause, CloseCause::ClientClosed | CloseCause::Io(_)) || self.force_closed() {
            return Err(cause);
        }
        self.record_cause(&cause);

        let received = self.status.lock().total_bytes_read;
        info!(received, elapsed = ?self.elapsed(), "Silent life over");
        let line = self.labeled(&format!(
            "Silent life over after {:?}, received {received} bytes",
            self.elapsed()
        ));
        self.write_final(line.as_bytes()).await
    }
}
