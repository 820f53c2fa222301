use std::{error, fmt, io};

use crate::BoxError;

#[derive(Debug)]
pub enum Error {
    /// The record could not be interpreted as an EMF document at all
    MalformedRecord(String),
    /// A sample's shape cannot be folded into the aggregator chosen for its metric
    IncompatibleSample(String),
    BuilderIncomplete(String),
    InvalidConfig(String),
    Io(io::Error),
    Json(serde_json::Error),
    /// The sink rejected or failed to deliver a flush
    Sink(BoxError),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRecord(msg) => write!(f, "malformed EMF record: {msg}"),
            Self::IncompatibleSample(msg) => write!(f, "incompatible sample: {msg}"),
            Self::BuilderIncomplete(msg) => write!(f, "builder incomplete: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Sink(err) => write!(f, "sink error: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::MalformedRecord(_)
            | Self::IncompatibleSample(_)
            | Self::BuilderIncomplete(_)
            | Self::InvalidConfig(_) => None,
            Self::Io(src) => Some(src),
            Self::Json(src) => Some(src),
            Self::Sink(src) => Some(src.as_ref()),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
