use crate::engine::handler::{ConnectionHandler, READ_BUFFER_SIZE};
use crate::engine::status::CloseCause;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, info};

const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Incoming side of the line protocol
struct LineReader {
    codec: LinesCodec,
    buffer: BytesMut,
}

impl LineReader {
    fn new() -> Self {
        Self {
            codec: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, CloseCause> {
        self.codec.decode(&mut self.buffer).map_err(|e| match e {
            LinesCodecError::Io(e) => CloseCause::Io(e),
            LinesCodecError::MaxLineLengthExceeded => CloseCause::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "line too long",
            )),
        })
    }
}

/// What a conversation line asks for
#[derive(Debug, PartialEq, Eq)]
enum Request<'a> {
    Goodbye,
    Ack(&'a str),
    Blank,
    Unknown,
}

fn parse_request(line: &str) -> Request<'_> {
    let trimmed = line.trim();
    if trimmed.to_ascii_uppercase().contains("GOODBYE") {
        Request::Goodbye
    } else if let Some(payload) = trimmed
        .strip_prefix("BEGIN/")
        .and_then(|rest| rest.strip_suffix("/END"))
    {
        Request::Ack(payload)
    } else if trimmed.is_empty() {
        Request::Blank
    } else {
        Request::Unknown
    }
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// HELLO handshake, then BEGIN/<payload>/END exchanges until GOODBYE.
    pub(crate) async fn run_conversation(&mut self) -> Result<(), CloseCause> {
        let mut lines = LineReader::new();

        loop {
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }
            match self.read_line(&mut lines).await? {
                Some(line) if line.to_ascii_uppercase().contains("HELLO") => {
                    self.send_message("HELLO").await?;
                    info!("Conversation started");
                    break;
                }
                Some(line) => debug!(line = %line, "Waiting for HELLO"),
                None => debug!("No data while waiting for HELLO"),
            }
        }

        loop {
            if let Some(cause) = self.closing_cause() {
                return Err(cause);
            }
            let Some(line) = self.read_line(&mut lines).await? else {
                debug!("No data from client");
                continue;
            };
            match parse_request(&line) {
                Request::Goodbye => {
                    self.send_message("GOODBYE").await?;
                    info!("Conversation ended by client");
                    return Ok(());
                }
                Request::Ack(payload) => {
                    let reply = format!("ACK/{payload}/END");
                    self.send_message(&reply).await?;
                }
                Request::Blank => debug!("Ignoring empty line"),
                Request::Unknown => {
                    debug!(line = %line, "Unexpected line");
                    self.send_message("ERROR").await?;
                }
            }
        }
    }

    /// Next complete line; `None` when a read or idle timeout passed without one.
    async fn read_line(&mut self, lines: &mut LineReader) -> Result<Option<String>, CloseCause> {
        let mut scratch = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(line) = lines.next_line()? {
                return Ok(Some(line));
            }
            match self.read(&mut scratch).await {
                Ok(n) => lines.buffer.extend_from_slice(&scratch[..n]),
                Err(CloseCause::ReadTimeout | CloseCause::IdleTimeout) => return Ok(None),
                Err(cause) => return Err(cause),
            }
        }
    }
}
