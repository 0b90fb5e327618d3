use crate::engine::handler::{ConnectionHandler, READ_BUFFER_SIZE};
use crate::engine::status::CloseCause;
use bytes::BytesMut;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Largest scratch buffer a validating connection allocates
const MAX_SCRATCH_SIZE: usize = 64 * 1024;

/// Outcome of payload validation, sent to the client as one line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Fewer bytes than expected arrived before the deadline
    Timeout,
    /// More bytes than expected arrived
    Exceeded,
    /// The length matched but the bytes did not
    ContentMismatch,
    Success,
}

impl Verdict {
    /// Classifies what was received against what was expected.
    ///
    /// `expected_content` is only compared when `check_content` is set.
    pub fn classify(
        received_len: usize,
        expected_len: usize,
        check_content: bool,
        received: &[u8],
        expected_content: &[u8],
    ) -> Self {
        if received_len > expected_len {
            Verdict::Exceeded
        } else if received_len < expected_len {
            Verdict::Timeout
        } else if check_content && received != expected_content {
            Verdict::ContentMismatch
        } else {
            Verdict::Success
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Verdict::Timeout => "TIMEOUT",
            Verdict::Exceeded => "EXCEEDED",
            Verdict::ContentMismatch => "CONTENT",
            Verdict::Success => "SUCCESS",
        }
    }

    fn message(&self, received_len: usize, expected_len: usize) -> String {
        match self {
            Verdict::Timeout => format!(
                "[{self}] Timed out after receiving {received_len} of {expected_len} expected bytes"
            ),
            Verdict::Exceeded => format!(
                "[{self}] Received {received_len} bytes, more than the expected {expected_len}"
            ),
            Verdict::ContentMismatch => {
                format!("[{self}] Received {received_len} bytes that do not match the expected payload")
            }
            Verdict::Success => format!("[{self}] Received expected payload of {expected_len} bytes"),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Collects up to the expected length, then replies with a single verdict.
    pub(crate) async fn run_payload_validation(&mut self) -> Result<(), CloseCause> {
        let expected_len = self.config.expected_payload_length;
        let check_content = self.config.validate_payload_content;
        let mut received = BytesMut::new();
        let mut total = 0usize;
        // Room for one byte past small expectations so an overrun shows up
        let scratch_size = expected_len
            .saturating_add(1)
            .clamp(READ_BUFFER_SIZE, MAX_SCRATCH_SIZE);
        let mut scratch = vec![0u8; scratch_size];

        while total < expected_len {
            if let Some(cause) = self.closing_cause() {
                if !matches!(cause, CloseCause::LifeTimeout) {
                    return Err(cause);
                }
                self.record_cause(&cause);
                break;
            }
            match self.read(&mut scratch).await {
                Ok(n) => {
                    total = total.saturating_add(n);
                    if check_content {
                        received.extend_from_slice(&scratch[..n]);
                    }
                }
                Err(cause) if cause.is_timeout() => {
                    self.record_cause(&cause);
                    break;
                }
                Err(cause) => return Err(cause),
            }
        }

        let verdict = Verdict::classify(
            total,
            expected_len,
            check_content,
            &received,
            &self.config.expected_payload,
        );
        info!(verdict = %verdict, received = total, expected = expected_len, "Payload validated");
        let line = self.labeled(&verdict.message(total, expected_len));
        self.write_final(line.as_bytes()).await
    }
}
