use super::Mode;
use crate::timing::{self, DEFAULT_IO_TIMEOUT, DEFAULT_VALIDATION_LIFE, StreamParams};
use crate::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Behaviour of one listening port
///
/// Timing values are kept as the human strings the operator supplied and as
/// parsed durations in [`Timings`]. Call [`TcpConfig::resolve`] after editing
/// the strings or flags; the store does this on every update.
///
/// # Examples
///
/// ```
/// use tcpsim::{Mode, TcpConfig};
///
/// let mut config: TcpConfig = serde_json::from_str(
///     r#"{"port": 9000, "conversation": true, "readTimeout": "5s"}"#,
/// ).unwrap();
/// config.resolve().unwrap();
/// assert_eq!(config.mode, Mode::Conversation);
/// assert_eq!(config.timings.read_timeout.as_secs(), 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TcpConfig {
    pub port: u16,
    /// Listener that owned the port when the config was applied
    pub listener_id: String,

    pub payload: bool,
    pub stream: bool,
    pub conversation: bool,
    pub validate_payload_length: bool,
    pub validate_payload_content: bool,
    pub silent_life: bool,
    pub close_at_first_byte: bool,

    pub read_timeout: String,
    pub write_timeout: String,
    pub connect_timeout: String,
    pub conn_idle_timeout: String,
    pub connection_life: String,
    pub response_delay: String,
    pub echo_response_delay: String,

    /// Echo chunk size; zero echoes every read as it arrives
    pub echo_response_size: usize,
    pub expected_payload_length: usize,
    pub expected_payload: Vec<u8>,
    pub response_payloads: Vec<String>,
    pub keep_open: bool,
    pub respond_after_read: bool,

    pub stream_payload_size: String,
    pub stream_chunk_size: String,
    pub stream_chunk_count: u64,
    pub stream_chunk_delay: String,
    pub stream_duration: String,

    /// Mode derived from the flags, reported but never read from input
    #[serde(skip_deserializing)]
    pub mode: Mode,
    #[serde(skip)]
    pub timings: Timings,
    #[serde(skip)]
    pub stream_params: StreamParams,
}

/// Parsed timing values of a [`TcpConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// Zero means unlimited
    pub connection_life: Duration,
    pub response_delay: Duration,
    pub echo_response_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
            connect_timeout: DEFAULT_IO_TIMEOUT,
            idle_timeout: DEFAULT_IO_TIMEOUT,
            connection_life: Duration::ZERO,
            response_delay: Duration::ZERO,
            echo_response_delay: Duration::ZERO,
        }
    }
}

/// Individually settable timing fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingField {
    ReadTimeout,
    WriteTimeout,
    ConnectTimeout,
    IdleTimeout,
    ConnectionLife,
    ResponseDelay,
    EchoResponseDelay,
}

impl TimingField {
    pub const ALL: [TimingField; 7] = [
        TimingField::ReadTimeout,
        TimingField::WriteTimeout,
        TimingField::ConnectTimeout,
        TimingField::IdleTimeout,
        TimingField::ConnectionLife,
        TimingField::ResponseDelay,
        TimingField::EchoResponseDelay,
    ];

    /// JSON name of the string field
    pub fn name(&self) -> &'static str {
        match self {
            TimingField::ReadTimeout => "readTimeout",
            TimingField::WriteTimeout => "writeTimeout",
            TimingField::ConnectTimeout => "connectTimeout",
            TimingField::IdleTimeout => "connIdleTimeout",
            TimingField::ConnectionLife => "connectionLife",
            TimingField::ResponseDelay => "responseDelay",
            TimingField::EchoResponseDelay => "echoResponseDelay",
        }
    }

    fn default_value(&self) -> Duration {
        match self {
            TimingField::ReadTimeout
            | TimingField::WriteTimeout
            | TimingField::ConnectTimeout
            | TimingField::IdleTimeout => DEFAULT_IO_TIMEOUT,
            _ => Duration::ZERO,
        }
    }
}

/// A partial set of stream parameters; at least two must be given
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamRequest {
    pub payload_size: Option<String>,
    pub chunk_size: Option<String>,
    pub chunk_count: Option<u64>,
    pub chunk_delay: Option<String>,
    pub duration: Option<String>,
}

impl StreamRequest {
    fn given(&self) -> usize {
        [
            self.payload_size.is_some(),
            self.chunk_size.is_some(),
            self.chunk_count.is_some(),
            self.chunk_delay.is_some(),
            self.duration.is_some(),
        ]
        .into_iter()
        .filter(|given| *given)
        .count()
    }
}

impl TcpConfig {
    /// Creates an echo config for `port` with all defaults resolved
    pub fn new(port: u16) -> Self {
        let mut config = Self {
            port,
            ..Default::default()
        };
        config.mode = config.resolve_mode();
        config
    }

    fn timing_string(&self, field: TimingField) -> &str {
        match field {
            TimingField::ReadTimeout => &self.read_timeout,
            TimingField::WriteTimeout => &self.write_timeout,
            TimingField::ConnectTimeout => &self.connect_timeout,
            TimingField::IdleTimeout => &self.conn_idle_timeout,
            TimingField::ConnectionLife => &self.connection_life,
            TimingField::ResponseDelay => &self.response_delay,
            TimingField::EchoResponseDelay => &self.echo_response_delay,
        }
    }

    fn timing_string_mut(&mut self, field: TimingField) -> &mut String {
        match field {
            TimingField::ReadTimeout => &mut self.read_timeout,
            TimingField::WriteTimeout => &mut self.write_timeout,
            TimingField::ConnectTimeout => &mut self.connect_timeout,
            TimingField::IdleTimeout => &mut self.conn_idle_timeout,
            TimingField::ConnectionLife => &mut self.connection_life,
            TimingField::ResponseDelay => &mut self.response_delay,
            TimingField::EchoResponseDelay => &mut self.echo_response_delay,
        }
    }

    /// Parses every string field, solves stream parameters and derives the mode.
    ///
    /// All fields are checked before anything is applied; the error carries
    /// one message per field that failed.
    pub fn resolve(&mut self) -> Result<()> {
        let mut errors = Vec::new();
        let mut timings = Timings::default();

        for field in TimingField::ALL {
            match timing::parse_duration(self.timing_string(field)) {
                Ok(value) => {
                    let value = value.unwrap_or_else(|| field.default_value());
                    match field {
                        TimingField::ReadTimeout => timings.read_timeout = value,
                        TimingField::WriteTimeout => timings.write_timeout = value,
                        TimingField::ConnectTimeout => timings.connect_timeout = value,
                        TimingField::IdleTimeout => timings.idle_timeout = value,
                        TimingField::ConnectionLife => timings.connection_life = value,
                        TimingField::ResponseDelay => timings.response_delay = value,
                        TimingField::EchoResponseDelay => timings.echo_response_delay = value,
                    }
                }
                Err(e) => errors.push(format!("{}: {e}", field.name())),
            }
        }

        let mut field_error = |name: &str, e: String| errors.push(format!("{name}: {e}"));
        let payload_size = timing::parse_size(&self.stream_payload_size)
            .unwrap_or_else(|e| {
                field_error("streamPayloadSize", e);
                None
            })
            .unwrap_or(0);
        let chunk_size = timing::parse_size(&self.stream_chunk_size)
            .unwrap_or_else(|e| {
                field_error("streamChunkSize", e);
                None
            })
            .unwrap_or(0);
        let chunk_delay = timing::parse_duration(&self.stream_chunk_delay)
            .unwrap_or_else(|e| {
                field_error("streamChunkDelay", e);
                None
            })
            .unwrap_or_default();
        let duration = timing::parse_duration(&self.stream_duration)
            .unwrap_or_else(|e| {
                field_error("streamDuration", e);
                None
            })
            .unwrap_or_default();

        if !errors.is_empty() {
            return Err(SimError::InvalidConfig(errors.join("; ")));
        }

        let requested = StreamParams {
            payload_size,
            chunk_size,
            chunk_count: self.stream_chunk_count,
            chunk_delay,
            duration,
        };
        let params = if self.stream {
            requested.solve_with_defaults()
        } else {
            requested.solve()
        };
        self.apply_stream_params(params);
        self.timings = timings;

        if self.validate_payload_content && self.expected_payload_length == 0 {
            self.expected_payload_length = self.expected_payload.len();
        }
        if !self.any_mode_flag() && !timings.connection_life.is_zero() {
            self.silent_life = true;
        }
        self.mode = self.resolve_mode();
        Ok(())
    }

    fn apply_stream_params(&mut self, params: StreamParams) {
        let size = |n: u64| if n == 0 { String::new() } else { n.to_string() };
        self.stream_payload_size = size(params.payload_size);
        self.stream_chunk_size = size(params.chunk_size);
        self.stream_chunk_count = params.chunk_count;
        self.stream_chunk_delay = timing::format_duration(params.chunk_delay);
        self.stream_duration = timing::format_duration(params.duration);
        self.stream_params = params;
    }

    fn any_mode_flag(&self) -> bool {
        self.payload
            || self.stream
            || self.conversation
            || self.validate_payload_length
            || self.validate_payload_content
            || self.silent_life
            || self.close_at_first_byte
    }

    /// Applies the dispatch precedence to the current flags
    pub fn resolve_mode(&self) -> Mode {
        if self.payload {
            Mode::ResponsePayload
        } else if self.stream {
            Mode::Stream
        } else if self.conversation {
            Mode::Conversation
        } else if self.validate_payload_content || self.validate_payload_length {
            Mode::PayloadValidation
        } else if self.silent_life || !self.timings.connection_life.is_zero() {
            Mode::SilentLife
        } else if self.close_at_first_byte {
            Mode::CloseAtFirstByte
        } else {
            Mode::Echo
        }
    }

    pub fn turn_off_all_modes(&mut self) {
        self.payload = false;
        self.stream = false;
        self.conversation = false;
        self.validate_payload_length = false;
        self.validate_payload_content = false;
        self.silent_life = false;
        self.close_at_first_byte = false;
    }

    /// Turns `mode` on and every other mode off.
    ///
    /// Echo has no flag of its own; with a connection life set it still
    /// resolves to SilentLife.
    pub fn enable_mode(&mut self, mode: Mode) {
        self.turn_off_all_modes();
        match mode {
            Mode::Echo => {}
            Mode::ResponsePayload => self.payload = true,
            Mode::Stream => self.stream = true,
            Mode::Conversation => self.conversation = true,
            Mode::PayloadValidation => {
                if self.expected_payload.is_empty() {
                    self.validate_payload_length = true;
                } else {
                    self.validate_payload_content = true;
                }
            }
            Mode::SilentLife => self.silent_life = true,
            Mode::CloseAtFirstByte => self.close_at_first_byte = true,
        }
    }

    pub fn set_timing(&mut self, field: TimingField, value: &str) -> Result<()> {
        timing::parse_duration(value)
            .map_err(|e| SimError::InvalidConfig(format!("{}: {e}", field.name())))?;
        *self.timing_string_mut(field) = value.trim().to_string();
        Ok(())
    }

    pub fn set_stream_request(&mut self, request: &StreamRequest) -> Result<()> {
        if request.given() < 2 {
            return Err(SimError::InvalidConfig(
                "at least two stream parameters are required".to_string(),
            ));
        }
        self.stream_payload_size = request.payload_size.clone().unwrap_or_default();
        self.stream_chunk_size = request.chunk_size.clone().unwrap_or_default();
        self.stream_chunk_count = request.chunk_count.unwrap_or(0);
        self.stream_chunk_delay = request.chunk_delay.clone().unwrap_or_default();
        self.stream_duration = request.duration.clone().unwrap_or_default();
        self.enable_mode(Mode::Stream);
        Ok(())
    }

    /// Expects `length` bytes without checking their content
    pub fn set_expected_payload_length(&mut self, length: usize) {
        self.expected_payload.clear();
        self.expected_payload_length = length;
        self.enable_mode(Mode::PayloadValidation);
    }

    /// Expects exactly `payload`, byte for byte
    pub fn set_expected_payload(&mut self, payload: Vec<u8>) {
        self.expected_payload_length = payload.len();
        self.expected_payload = payload;
        self.enable_mode(Mode::PayloadValidation);
    }

    /// Connection life the handler enforces, including the validation default
    pub fn effective_connection_life(&self) -> Duration {
        let life = self.timings.connection_life;
        if life.is_zero() && self.mode == Mode::PayloadValidation {
            DEFAULT_VALIDATION_LIFE
        } else {
            life
        }
    }
}
