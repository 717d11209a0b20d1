//! Error types for fabricsync

use thiserror::Error;

/// Exit code used when the Fabric session can no longer authenticate.
pub const EXIT_AUTH_EXPIRED: i32 = 2;
/// Exit code used when this agent's own heartbeat aged past `max_down_time`.
pub const EXIT_HEARTBEAT_EXPIRED: i32 = 3;

/// Fabric error codes that permanently reject a specific object.
const OPERATION_CRITICAL_CODES: &[&str] = &["122"];
/// Fabric error codes known to be retryable for a specific object.
const OPERATION_TRANSIENT_CODES: &[&str] = &["102"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("fabric rejected {dn}: code {code}: {text}")]
    FabricResponse {
        dn: String,
        code: String,
        text: String,
    },

    #[error("fabric unreachable: {0}")]
    FabricUnreachable(String),

    #[error("fabric session expired: {0}")]
    SessionExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("subscription failed for {root} with code {code}: {text}")]
    SubscriptionFailed {
        root: String,
        code: String,
        text: String,
    },

    #[error("heartbeat expired for agent {0}")]
    HeartbeatExpired(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("invalid dn: {0}")]
    InvalidDn(String),

    #[error("unknown fabric class: {0}")]
    UnknownClass(String),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("json error: {0}")]
    Json(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories driving the reconciler's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The Fabric permanently rejected this object; fail it immediately.
    OperationCritical,
    /// Object-specific but retryable; fail after the purge limit.
    OperationTransient,
    /// Environment hiccup (timeout, reset); retry forever, never fail the object.
    SystemTransient,
    /// The session itself is unusable; the process must terminate.
    SystemCritical,
    /// Anything unrecognized; treated like OperationTransient.
    Unknown,
}

impl Error {
    pub fn fabric_response(
        dn: impl Into<String>,
        code: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::FabricResponse {
            dn: dn.into(),
            code: code.into(),
            text: text.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when a Fabric read came back 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Categorize this error for the reconciler's retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::FabricResponse { code, .. } => {
                if OPERATION_CRITICAL_CODES.contains(&code.as_str()) {
                    ErrorClass::OperationCritical
                } else if OPERATION_TRANSIENT_CODES.contains(&code.as_str()) {
                    ErrorClass::OperationTransient
                } else {
                    ErrorClass::Unknown
                }
            }
            Self::FabricUnreachable(_) => ErrorClass::SystemTransient,
            Self::SessionExpired(_) => ErrorClass::SystemCritical,
            Self::HeartbeatExpired(_) => ErrorClass::SystemCritical,
            Self::NotFound(_) => ErrorClass::OperationTransient,
            _ => ErrorClass::Unknown,
        }
    }

    /// Exit code for SYSTEM_CRITICAL errors; `None` for everything else.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::SessionExpired(_) => Some(EXIT_AUTH_EXPIRED),
            Self::HeartbeatExpired(_) => Some(EXIT_HEARTBEAT_EXPIRED),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_fabric_codes() {
        let critical = Error::fabric_response("uni/tn-t", "122", "bad value");
        assert_eq!(ErrorClass::OperationCritical, critical.class());

        let transient = Error::fabric_response("uni/tn-t", "102", "busy");
        assert_eq!(ErrorClass::OperationTransient, transient.class());

        let other = Error::fabric_response("uni/tn-t", "999", "who knows");
        assert_eq!(ErrorClass::Unknown, other.class());
    }

    #[test]
    fn classify_system_errors() {
        assert_eq!(
            ErrorClass::SystemTransient,
            Error::FabricUnreachable("timeout".into()).class()
        );
        let expired = Error::SessionExpired("no auth cookie".into());
        assert_eq!(ErrorClass::SystemCritical, expired.class());
        assert_eq!(Some(EXIT_AUTH_EXPIRED), expired.exit_code());
    }
}
