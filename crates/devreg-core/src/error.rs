//! Error types for the device registry
//!
//! Every failure belongs to exactly one [`ErrorKind`]. When an error crosses a
//! layer boundary it is wrapped in [`Error::Tagged`] together with the layer and
//! operation that produced or last handled it; the wrapped error remains
//! reachable through [`std::error::Error::source`]. A tag may also carry
//! key/value context such as `device_id` or `table`.

use std::fmt;
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by store, unmarshal and internal errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input violated a field rule
    Validation,
    /// The referenced record does not exist (or the table is empty)
    NotFound,
    /// Stored data could not be interpreted as a device record
    Unmarshal,
    /// The persistence layer reported an operational failure
    Store,
    /// Anything not recognized as one of the above
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unmarshal => "unmarshal",
            ErrorKind::Store => "store",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the caller, not the server, is at fault
    pub fn is_client_fault(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::NotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer an error was produced in or last passed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Store,
    Engine,
    Listener,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Store => "store",
            Layer::Engine => "engine",
            Layer::Listener => "listener",
        })
    }
}

/// Core error type for the device registry
#[derive(Error, Debug)]
pub enum Error {
    /// One or more field rules were violated; every violation is listed
    #[error("Validation failed: {}", .violations.join("; "))]
    Validation { violations: Vec<String> },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored item could not be decoded into a device
    #[error("Failed to unmarshal device data: {message}")]
    Unmarshal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Persistence layer failure, potentially transient
    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Unclassified failure
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// An error annotated with the layer and operation it crossed
    #[error("{layer}::{operation}: {source}")]
    Tagged {
        layer: Layer,
        operation: &'static str,
        context: Vec<(&'static str, String)>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error listing every violated rule
    pub fn validation(violations: Vec<String>) -> Self {
        Self::Validation { violations }
    }

    /// Create a validation error for a single rule
    pub fn invalid(rule: impl Into<String>) -> Self {
        Self::Validation {
            violations: vec![rule.into()],
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unmarshal error without an underlying cause
    pub fn unmarshal(msg: impl Into<String>) -> Self {
        Self::Unmarshal {
            message: msg.into(),
            source: None,
        }
    }

    /// Create an unmarshal error wrapping its cause
    pub fn unmarshal_with(msg: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unmarshal {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    /// Create a store error without an underlying cause
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a store error wrapping its cause
    pub fn store_with(msg: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Store {
            message: msg.into(),
            source: Some(source.into()),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a configuration error
    ///
    /// Configuration problems surface before any record is touched, so they
    /// are reported as validation failures of the supplied settings.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::invalid(msg)
    }

    /// Wrap this error with the layer and operation it is crossing
    pub fn tagged(self, layer: Layer, operation: &'static str) -> Self {
        Self::Tagged {
            layer,
            operation,
            context: Vec::new(),
            source: Box::new(self),
        }
    }

    /// Attach a key/value pair to the outermost tag
    ///
    /// Untagged errors have nowhere to carry context and are returned as is.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        if let Error::Tagged { context, .. } = &mut self {
            context.push((key, value.into()));
        }
        self
    }

    /// Every context pair, outermost tag first
    pub fn context(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        let mut current = self;
        while let Error::Tagged {
            context, source, ..
        } = current
        {
            pairs.extend(context.iter().map(|(k, v)| (*k, v.as_str())));
            current = source;
        }
        pairs
    }

    /// Value recorded under `key` by the outermost tag that has one
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// The innermost, untagged error
    pub fn origin(&self) -> &Error {
        match self {
            Error::Tagged { source, .. } => source.origin(),
            other => other,
        }
    }

    /// Kind of the underlying failure
    pub fn kind(&self) -> ErrorKind {
        match self.origin() {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unmarshal { .. } => ErrorKind::Unmarshal,
            Error::Store { .. } => ErrorKind::Store,
            Error::Internal { .. } | Error::Tagged { .. } => ErrorKind::Internal,
        }
    }

    /// Layer of the outermost tag, if any
    pub fn layer(&self) -> Option<Layer> {
        match self {
            Error::Tagged { layer, .. } => Some(*layer),
            _ => None,
        }
    }

    /// Operation of the outermost tag, if any
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::Tagged { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Every (layer, operation) tag from outermost to innermost
    pub fn trail(&self) -> Vec<(Layer, &'static str)> {
        let mut trail = Vec::new();
        let mut current = self;
        while let Error::Tagged {
            layer,
            operation,
            source,
            ..
        } = current
        {
            trail.push((*layer, *operation));
            current = source;
        }
        trail
    }

    /// Violated rules when this is a validation failure
    pub fn violations(&self) -> &[String] {
        match self.origin() {
            Error::Validation { violations } => violations,
            _ => &[],
        }
    }

    /// Whether redelivering the same request may succeed
    ///
    /// Only store failures are considered transient. A missing record, a
    /// malformed request or a corrupt item fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Store
    }

    /// Whether the failure should be reported as a client fault
    pub fn is_client_fault(&self) -> bool {
        self.kind().is_client_fault()
    }

    /// Message safe to show outside the process
    ///
    /// Client faults keep their detail; server faults expose only their kind.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotFound => self.origin().to_string(),
            ErrorKind::Unmarshal => "stored device data is unreadable".to_string(),
            ErrorKind::Store => "device store is unavailable".to_string(),
            ErrorKind::Internal => "an internal error occurred".to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::store_with("I/O failure", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::unmarshal_with("invalid JSON", err)
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn validation_message_lists_every_violation() {
        let err = Error::validation(vec![
            "MAC address is required".to_string(),
            "type is required".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: MAC address is required; type is required"
        );
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn tagging_preserves_kind_and_cause() {
        let io = std::io::Error::other("disk gone");
        let err = Error::from(io)
            .tagged(Layer::Store, "merge_update")
            .tagged(Layer::Engine, "update");

        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.layer(), Some(Layer::Engine));
        assert_eq!(err.operation(), Some("update"));
        assert_eq!(
            err.trail(),
            vec![(Layer::Engine, "update"), (Layer::Store, "merge_update")]
        );
        assert!(err.is_retryable());

        // engine tag -> store tag -> store error -> io error
        let store_tag = err.source().unwrap();
        let store_err = store_tag.source().unwrap();
        let io_err = store_err.source().unwrap();
        assert_eq!(io_err.to_string(), "disk gone");
    }

    #[test]
    fn context_is_collected_across_tags() {
        let err = Error::not_found("device abc")
            .tagged(Layer::Store, "get")
            .with_context("device_id", "abc")
            .with_context("table", "devices")
            .tagged(Layer::Engine, "get");

        assert_eq!(err.context(), vec![("device_id", "abc"), ("table", "devices")]);
        assert_eq!(err.context_value("table"), Some("devices"));
        assert_eq!(err.context_value("home_id"), None);
        // Context does not change the rendered message
        assert_eq!(err.to_string(), "engine::get: store::get: Not found: device abc");
    }

    #[test]
    fn context_on_untagged_error_is_dropped() {
        let err = Error::store("timeout").with_context("device_id", "abc");
        assert!(err.context().is_empty());
    }

    #[test]
    fn not_found_is_terminal_client_fault() {
        let err = Error::not_found("device abc").tagged(Layer::Store, "get");
        assert!(!err.is_retryable());
        assert!(err.is_client_fault());
        assert_eq!(err.public_message(), "Not found: device abc");
    }

    #[test]
    fn server_faults_hide_detail() {
        let err = Error::store("connection reset by 10.0.0.7").tagged(Layer::Store, "scan");
        assert!(!err.is_client_fault());
        assert!(!err.public_message().contains("10.0.0.7"));
    }
}
