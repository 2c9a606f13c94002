//! Plugin endpoint addresses.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::CsiError;

/// Address the plugin serves on.
///
/// Accepted spellings: `unix:/path`, `unix:///path`, `unix://relative`,
/// a bare absolute path, and `tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("unix:") {
            let rest = &s["unix:".len()..];
            let path = rest.strip_prefix("//").unwrap_or(rest);
            if path.is_empty() {
                return Err(CsiError::invalid_argument(format!("invalid endpoint: {s}")));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if lower.starts_with("tcp://") {
            let addr = &s["tcp://".len()..];
            if addr.is_empty() {
                return Err(CsiError::invalid_argument(format!("invalid endpoint: {s}")));
            }
            return Ok(Self::Tcp(addr.to_owned()));
        }
        if s.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(s)));
        }
        Err(CsiError::invalid_argument(format!("invalid endpoint: {s}")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
