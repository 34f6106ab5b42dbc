//! Error types for mail dispatch.
//!
//! Every failure the engine can produce is a [`DispatchError`] carrying a
//! [`DispatchErrorKind`]. Kinds are grouped into the four categories of the
//! pipeline (parse, assembly, configuration, transport) so the dispatcher can
//! report failures uniformly.

use std::fmt;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Dispatch error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    // Parse errors
    /// An address entry failed mailbox validation.
    InvalidAddress,
    /// A header line could not be split into name and value.
    InvalidHeader,

    // Assembly errors
    /// No valid primary recipient remained after parsing.
    NoValidRecipients,
    /// Both subject and body are empty.
    MissingContent,
    /// The resolved sender address is invalid.
    InvalidSender,

    // Configuration errors
    /// No SMTP host could be resolved.
    MissingHost,
    /// The connection string could not be parsed.
    InvalidConnectionString,
    /// Unknown security mode.
    InvalidSecurityMode,
    /// A setting has an invalid value.
    InvalidSetting,

    // Transport errors
    /// The transport raised an error.
    TransportFailed,
    /// The transport declined the message without raising.
    SendRejected,
    /// An attachment could not be read.
    AttachmentError,
    /// The message could not be encoded.
    EncodingFailed,

    // Generic
    /// Unknown or internal error.
    Unknown,
}

/// Pipeline stage an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Address or header parsing.
    Parse,
    /// Message assembly.
    Assembly,
    /// Transport configuration.
    Config,
    /// Transport send.
    Transport,
}

impl DispatchErrorKind {
    /// Returns the pipeline category of this kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DispatchErrorKind::InvalidAddress | DispatchErrorKind::InvalidHeader => {
                ErrorCategory::Parse
            }
            DispatchErrorKind::NoValidRecipients
            | DispatchErrorKind::MissingContent
            | DispatchErrorKind::InvalidSender => ErrorCategory::Assembly,
            DispatchErrorKind::MissingHost
            | DispatchErrorKind::InvalidConnectionString
            | DispatchErrorKind::InvalidSecurityMode
            | DispatchErrorKind::InvalidSetting => ErrorCategory::Config,
            DispatchErrorKind::TransportFailed
            | DispatchErrorKind::SendRejected
            | DispatchErrorKind::AttachmentError
            | DispatchErrorKind::EncodingFailed
            | DispatchErrorKind::Unknown => ErrorCategory::Transport,
        }
    }

    /// Returns the severity level of this error kind.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Misconfiguration never recovers on its own
            DispatchErrorKind::MissingHost
            | DispatchErrorKind::InvalidConnectionString
            | DispatchErrorKind::InvalidSecurityMode
            | DispatchErrorKind::InvalidSetting => ErrorSeverity::Critical,

            DispatchErrorKind::TransportFailed
            | DispatchErrorKind::SendRejected
            | DispatchErrorKind::AttachmentError
            | DispatchErrorKind::EncodingFailed
            | DispatchErrorKind::Unknown => ErrorSeverity::Error,

            DispatchErrorKind::NoValidRecipients
            | DispatchErrorKind::MissingContent
            | DispatchErrorKind::InvalidSender => ErrorSeverity::Warning,

            DispatchErrorKind::InvalidAddress | DispatchErrorKind::InvalidHeader => {
                ErrorSeverity::Info
            }
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchErrorKind::InvalidAddress => write!(f, "Invalid address"),
            DispatchErrorKind::InvalidHeader => write!(f, "Invalid header"),
            DispatchErrorKind::NoValidRecipients => write!(f, "No valid recipients"),
            DispatchErrorKind::MissingContent => write!(f, "Missing subject and body"),
            DispatchErrorKind::InvalidSender => write!(f, "Invalid sender address"),
            DispatchErrorKind::MissingHost => write!(f, "Missing SMTP host"),
            DispatchErrorKind::InvalidConnectionString => write!(f, "Invalid connection string"),
            DispatchErrorKind::InvalidSecurityMode => write!(f, "Invalid security mode"),
            DispatchErrorKind::InvalidSetting => write!(f, "Invalid setting"),
            DispatchErrorKind::TransportFailed => write!(f, "Transport failure"),
            DispatchErrorKind::SendRejected => write!(f, "Send rejected"),
            DispatchErrorKind::AttachmentError => write!(f, "Attachment error"),
            DispatchErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            DispatchErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - input entry skipped.
    Info,
    /// Warning - the caller supplied an unusable request.
    Warning,
    /// Error - the send failed.
    Error,
    /// Critical - requires operator attention.
    Critical,
}

/// Dispatch error with detailed information.
#[derive(Error, Debug)]
pub struct DispatchError {
    /// Error kind.
    kind: DispatchErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP status code reported by the transport, if any.
    transport_code: Option<u16>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DispatchError {
    /// Creates a new dispatch error.
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transport_code: None,
            cause: None,
        }
    }

    /// Sets the transport status code.
    pub fn with_transport_code(mut self, code: u16) -> Self {
        self.transport_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> DispatchErrorKind {
        self.kind
    }

    /// Returns the pipeline category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the transport status code if available.
    pub fn transport_code(&self) -> Option<u16> {
        self.transport_code
    }

    /// Returns the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    // Convenience constructors

    /// Creates a parse error.
    pub fn parse(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates an assembly error.
    pub fn assembly(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a configuration error.
    pub fn configuration(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::TransportFailed, message)
    }

    /// Creates an attachment error.
    pub fn attachment(message: impl Into<String>) -> Self {
        Self::new(DispatchErrorKind::AttachmentError, message)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.transport_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

impl Serialize for DispatchError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("DispatchError", 4)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("transport_code", &self.transport_code)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_categories() {
        assert_eq!(DispatchErrorKind::InvalidAddress.category(), ErrorCategory::Parse);
        assert_eq!(DispatchErrorKind::NoValidRecipients.category(), ErrorCategory::Assembly);
        assert_eq!(DispatchErrorKind::MissingHost.category(), ErrorCategory::Config);
        assert_eq!(DispatchErrorKind::SendRejected.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::transport("mailbox unavailable").with_transport_code(550);
        assert_eq!(err.to_string(), "Transport failure: mailbox unavailable (SMTP 550)");
        assert_eq!(err.transport_code(), Some(550));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(DispatchErrorKind::MissingHost.severity(), ErrorSeverity::Critical);
        assert_eq!(DispatchErrorKind::TransportFailed.severity(), ErrorSeverity::Error);
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
    }

    #[test]
    fn test_error_serializes_category() {
        let err = DispatchError::assembly(DispatchErrorKind::MissingContent, "empty");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "missing_content");
        assert_eq!(json["category"], "assembly");
        assert_eq!(json["transport_code"], serde_json::Value::Null);
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = DispatchError::attachment("cannot read report.pdf").with_cause(io);
        assert!(err.source().is_some());
    }
}
