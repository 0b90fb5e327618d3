use crate::engine::handler::ConnectionHandler;
use crate::engine::status::CloseCause;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Waits for a single byte, says GOODBYE and hangs up.
    pub(crate) async fn run_close_at_first_byte(&mut self) -> Result<(), CloseCause> {
        let mut first = [0u8; 1];
        self.read_within(&mut first, None).await?;
        info!("First byte received, closing");
        self.send_message("GOODBYE").await
    }
}
