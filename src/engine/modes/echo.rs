use crate::engine::echo_buffer::EchoBuffer;
use crate::engine::handler::{ConnectionHandler, READ_BUFFER_SIZE};
use crate::engine::status::CloseCause;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Echoes what the client sends, re-chunked to `echo_response_size`.
    ///
    /// Ends on the first failed read; a partial chunk left at that point is
    /// never sent.
    pub(crate) async fn run_echo(&mut self) -> Result<(), CloseCause> {
        let chunk_size = self.config.echo_response_size;
        let delay = self.config.timings.echo_response_delay;
        let mut queue = EchoBuffer::new(chunk_size);
        let mut scratch = vec![0u8; chunk_size.max(READ_BUFFER_SIZE)];

        loop {
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }
            let n = self.read(&mut scratch).await.inspect_err(|_| {
                if queue.pending() > 0 {
                    debug!(discarded = queue.pending(), "Dropping incomplete echo chunk");
                }
            })?;
            queue.push(&scratch[..n]);

            while let Some(chunk) = queue.pop_chunk() {
                if !self.pause(delay).await {
                    return Err(CloseCause::ServerClosed);
                }
                self.write(&chunk).await?;
            }
        }
    }
}
