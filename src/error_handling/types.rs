use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadPortsRange(String),
    BadSnapshotLength(String),
    DirectoryDoesNotExist(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::BadSnapshotLength(e) => write!(f, "Snapshot length error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Record-level decoding failures. These are always skip-and-continue for
/// the session consuming the stream, never terminal.
#[derive(Debug)]
pub enum CodecError {
    MalformedMetadata(String),
    TruncatedRecord(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedMetadata(e) => write!(f, "Malformed capture metadata: {}", e),
            CodecError::TruncatedRecord(e) => write!(f, "Truncated packet record: {}", e),
        }
    }
}

impl std::error::Error for CodecError {}

#[derive(Debug)]
pub enum FilterError {
    FetchFailed(String),
    ResolutionFailed(String),
    IoError(std::io::Error),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::FetchFailed(e) => write!(f, "Exception list fetch failed: {}", e),
            FilterError::ResolutionFailed(e) => write!(f, "Domain resolution failed: {}", e),
            FilterError::IoError(e) => write!(f, "Filter IO error: {}", e),
        }
    }
}

impl std::error::Error for FilterError {}

impl From<std::io::Error> for FilterError {
    fn from(err: std::io::Error) -> Self {
        FilterError::IoError(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    UnknownEndpoint(String),
    DuplicateActiveSession(String),
    FileIoError(std::io::Error),
    TransportError(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownEndpoint(addr) => {
                write!(f, "No registered endpoint for address {}", addr)
            }
            SessionError::DuplicateActiveSession(addr) => {
                write!(f, "Endpoint {} already has an active session", addr)
            }
            SessionError::FileIoError(e) => write!(f, "Trace file IO error: {}", e),
            SessionError::TransportError(e) => write!(f, "Session transport error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

/// Failures of the collector's listening surfaces. Session and
/// configuration problems are reported where they occur and never bubble
/// up through this type.
#[derive(Debug)]
pub enum CollectorError {
    BindError(std::io::Error),
    AcceptError(std::io::Error),
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorError::BindError(e) => write!(f, "Collector bind error: {}", e),
            CollectorError::AcceptError(e) => write!(f, "Collector accept error: {}", e),
        }
    }
}

impl std::error::Error for CollectorError {}

#[derive(Debug)]
pub enum AgentError {
    ConnectionFailed(std::io::Error),
    TransportError(std::io::Error),
    HandshakeFailed(String),
    Refused(String),
    FilterError(FilterError),
    CaptureError(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ConnectionFailed(e) => write!(f, "Cannot connect to collector: {}", e),
            AgentError::TransportError(e) => write!(f, "Agent transport error: {}", e),
            AgentError::HandshakeFailed(e) => write!(f, "Handshake failed: {}", e),
            AgentError::Refused(reason) => write!(f, "Stream refused by collector: {}", reason),
            AgentError::FilterError(e) => write!(f, "Filter error: {}", e),
            AgentError::CaptureError(e) => write!(f, "Capture source error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::TransportError(err)
    }
}

impl From<FilterError> for AgentError {
    fn from(err: FilterError) -> Self {
        AgentError::FilterError(err)
    }
}
