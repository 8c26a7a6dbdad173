use std::net::Ipv4Addr;

use thiserror::Error;

use crate::models::filter::FilterId;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from pcap library
    #[error("PCAP error: {0}")]
    PcapError(#[from] pcap::Error),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A host command (tc, ip) could not be run or exited unsuccessfully
    #[error("Command error: {0}")]
    CommandError(String),

    /// Error from the packet capture reader
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// The statistics collector has never observed this address
    #[error("No traffic counter sampled for {0}")]
    NotFound(Ipv4Addr),

    /// No filter with this id was loaded
    #[error("Unknown filter id {0}")]
    UnknownId(FilterId),

    /// The requested operation conflicts with the filter's current state
    #[error("{0}")]
    InvalidState(String),

    /// The filter is already in the requested membership state
    #[error("{0}")]
    AlreadyInState(String),

    /// A request parameter has an unsupported value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
