use crate::engine::handler::{ConnectionHandler, READ_BUFFER_SIZE};
use crate::engine::status::CloseCause;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::sleep;
use tracing::debug;

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends the configured payloads in order, optionally reading before each.
    ///
    /// An empty payload repeats the previous one.
    pub(crate) async fn run_response_payloads(&mut self) -> Result<(), CloseCause> {
        let payloads = self.config.response_payloads.clone();
        let delay = self.config.timings.response_delay;
        let mut scratch = vec![0u8; READ_BUFFER_SIZE];
        let mut previous = String::new();

        for (index, payload) in payloads.iter().enumerate() {
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }
            if self.config.respond_after_read {
                let n = self.read(&mut scratch).await?;
                debug!(index, size = n, "Read before response");
            }
            if !self.pause(delay).await {
                return Err(CloseCause::ServerClosed);
            }
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }

            if !payload.is_empty() {
                previous.clone_from(payload);
            }
            self.write(previous.as_bytes()).await?;
            debug!(index, size = previous.len(), "Sent response payload");
        }

        if self.config.keep_open {
            return self.hold_open().await;
        }
        Ok(())
    }

    /// Keeps the socket open without writing until the connection life runs
    /// out. With unlimited life it waits for the client to go away or a forced
    /// close instead; read and idle timeouts do not end it.
    async fn hold_open(&mut self) -> Result<(), CloseCause> {
        match self.remaining_life() {
            Some(remaining) => {
                debug!(remaining = ?remaining, "Holding connection open");
                tokio::select! {
                    _ = self.cancelled() => Err(CloseCause::ServerClosed),
                    _ = sleep(remaining) => Err(CloseCause::LifeTimeout),
                }
            }
            None => {
                let mut scratch = vec![0u8; READ_BUFFER_SIZE];
                loop {
                    if let Some(cause) = self.closing_cause() {
                        return Err(cause);
                    }
                    match self.read(&mut scratch).await {
                        Ok(_) => {}
                        Err(CloseCause::ReadTimeout | CloseCause::IdleTimeout) => {
                            debug!("Held connection still open");
                        }
                        Err(cause) => return Err(cause),
                    }
                }
            }
        }
    }
}
