//! The `Response<T>` result type shared by every protocol- and session-level operation.

use std::fmt;

/// Outcome of a single protocol operation.
///
/// `Success` always carries a value — there is no "success with no value" state, so callers
/// never have to second-guess whether a successful response is actually usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response<T> {
    Success(T),
    Timeout(Option<String>),
    Error(Option<String>),
    Truncated(Option<String>),
    UnexpectedResponse(Option<String>),
    Refused(Option<String>),
    Cancelled,
}

impl<T> Response<T> {
    pub fn success(value: T) -> Self {
        Response::Success(value)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Response::Timeout(Some(message.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(Some(message.into()))
    }

    pub fn truncated(message: impl Into<String>) -> Self {
        Response::Truncated(Some(message.into()))
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Response::UnexpectedResponse(Some(message.into()))
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Response::Refused(Some(message.into()))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Response::Cancelled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Response::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Response::Success(v) => Some(v),
            _ => None,
        }
    }

    /// Message carried by a non-success status, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Response::Success(_) | Response::Cancelled => None,
            Response::Timeout(m)
            | Response::Error(m)
            | Response::Truncated(m)
            | Response::UnexpectedResponse(m)
            | Response::Refused(m) => m.as_deref(),
        }
    }

    /// Re-tag a non-success `Response<T>` as `Response<U>`, preserving the status and message.
    /// Panics if called on `Success` — callers should map the success value explicitly instead.
    pub fn recast<U>(self) -> Response<U> {
        match self {
            Response::Success(_) => panic!("recast called on Response::Success"),
            Response::Timeout(m) => Response::Timeout(m),
            Response::Error(m) => Response::Error(m),
            Response::Truncated(m) => Response::Truncated(m),
            Response::UnexpectedResponse(m) => Response::UnexpectedResponse(m),
            Response::Refused(m) => Response::Refused(m),
            Response::Cancelled => Response::Cancelled,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Response::Success(v) => Response::Success(f(v)),
            other => other.recast(),
        }
    }
}

impl<T> fmt::Display for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success(_) => write!(f, "success"),
            Response::Timeout(m) => write!(f, "timeout{}", suffix(m)),
            Response::Error(m) => write!(f, "error{}", suffix(m)),
            Response::Truncated(m) => write!(f, "truncated{}", suffix(m)),
            Response::UnexpectedResponse(m) => write!(f, "unexpected response{}", suffix(m)),
            Response::Refused(m) => write!(f, "refused{}", suffix(m)),
            Response::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn suffix(m: &Option<String>) -> String {
    match m {
        Some(s) => format!(": {s}"),
        None => String::new(),
    }
}
