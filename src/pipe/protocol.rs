use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::Message;

/// Identifier the pipe broker registers under
pub const PIPE_SERVICE_ID: &str = "isolink.pipe";

pub(crate) const NOT_ACCEPTING: &str = "server is not accepting connections";

/// Requests a pipe client sends to the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PipeRequest {
    BindServer { name: String, version: String },
    AcceptServer { endpoint_id: u64 },
    BindClient { name: String, version: String },
    CloseServer { endpoint_id: u64 },
}

/// Broker replies; link handovers follow as separate link messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PipeReply {
    Bound { endpoint_id: u64 },
    Connected { server_version: String },
    Closed,
    Fail { reason: String },
}

impl PipeReply {
    pub(crate) fn fail(reason: impl Into<String>) -> Self {
        PipeReply::Fail {
            reason: reason.into(),
        }
    }

    /// Decode a reply, turning `Fail` into [`Error::Pipe`]
    pub(crate) fn from_message(msg: Message) -> Result<Self> {
        match msg.decode::<PipeReply>()? {
            PipeReply::Fail { reason } => Err(Error::Pipe(reason)),
            reply => Ok(reply),
        }
    }
}

/// First message on an accept link when a client connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Incoming {
    pub requested_version: String,
}

/// A pipe version, `major.minor[.micro]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PipeVersion {
    /// Whether a server at this version can serve a client asking for
    /// `requested`
    pub fn satisfies(&self, requested: &PipeVersion) -> bool {
        self.major == requested.major && self >= requested
    }
}

impl FromStr for PipeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::Pipe(format!("malformed version '{s}'"));
        let mut parts = s.split('.');
        let mut number = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_| malformed()),
                None if required => Err(malformed()),
                None => Ok(0),
            }
        };
        let version = PipeVersion {
            major: number(true)?,
            minor: number(true)?,
            micro: number(false)?,
        };
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

impl fmt::Display for PipeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PipeVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!(
            v("1.2"),
            PipeVersion {
                major: 1,
                minor: 2,
                micro: 0
            }
        );
        assert_eq!(v("3.0.7").micro, 7);
        for bad in ["", "1", "1.", "a.b", "1.2.3.4", "-1.0"] {
            assert!(bad.parse::<PipeVersion>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_version_matching() {
        assert!(v("1.2").satisfies(&v("1.0")));
        assert!(v("1.2.1").satisfies(&v("1.2")));
        assert!(!v("1.2").satisfies(&v("1.3")));
        assert!(!v("2.0").satisfies(&v("1.0")));
    }

    #[test]
    fn test_fail_reply_becomes_error() {
        let msg = Message::encode(&PipeReply::fail("nope")).unwrap();
        let err = PipeReply::from_message(msg).unwrap_err();
        assert!(matches!(err, Error::Pipe(reason) if reason == "nope"));
    }
}
