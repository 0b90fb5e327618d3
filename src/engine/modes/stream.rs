use crate::engine::handler::ConnectionHandler;
use crate::engine::status::CloseCause;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Writes one random chunk `chunk_count` times, `chunk_delay` apart.
    /// Never reads from the client.
    pub(crate) async fn run_stream(&mut self) -> Result<(), CloseCause> {
        let params = self.config.stream_params;
        if !self.pause(self.config.timings.response_delay).await {
            return Err(CloseCause::ServerClosed);
        }

        let chunk = random_chunk(params.chunk_size);
        info!(
            chunk_size = chunk.len(),
            chunk_count = params.chunk_count,
            chunk_delay = ?params.chunk_delay,
            "Streaming payload"
        );

        for index in 0..params.chunk_count {
            if index > 0 && !self.pause(params.chunk_delay).await {
                return Err(CloseCause::ServerClosed);
            }
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }
            self.write(&chunk).await?;
            debug!(index, "Sent stream chunk");
        }
        Ok(())
    }
}

fn random_chunk(size: u64) -> Vec<u8> {
    let size = usize::try_from(size).unwrap_or(usize::MAX).max(1);
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .collect()
}
