use std::{fmt, io};

/// Convenience alias used throughout the stack.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Enum with all possible errors that can occur in this library.
#[derive(Debug)]
pub enum ErrorKind {
    /// An address-tree lookup missed. Carries the requested path and, when
    /// one exists, the longest prefix of it that does resolve.
    NoBranchFoundWithGivenUID {
        /// The dotted path that was requested.
        path: String,
        /// Longest resolvable prefix of `path`, if any.
        partial_match: Option<String>,
    },
    /// A read was issued against a node without read permission.
    ReadAccessDenied(String),
    /// A write was issued against a node without write permission.
    WriteAccessDenied(String),
    /// A block transfer of length other than one was issued against a
    /// single-register node.
    BulkTransferOnSingleRegister(String),
    /// A block transfer exceeded the endpoint size declared by the node.
    BulkTransferRequestedTooLarge {
        /// Id of the offending node.
        node: String,
        /// Number of words requested.
        requested: usize,
        /// Number of words the endpoint exposes.
        size: usize,
    },
    /// The URI could not yield a target IP address and port.
    /// The name is retained for diagnostic compatibility with the upstream
    /// address-file tooling, though the check is on the URI.
    XmlFileMissingRequiredParameters(String),
    /// The ControlHub reported that the target device did not respond.
    ControlHubTargetTimeout,
    /// The ControlHub reported a timeout between its internal processes.
    ControlHubInternalTimeout,
    /// The ControlHub reported an error code this client does not know.
    ControlHubReportedError(u16),
    /// A reply header did not match the request it answers.
    IpbusValidationFailed(String),
    /// The transport did not receive a reply within the timeout period.
    TransportTimeout,
    /// A deferred value was accessed before its batch dispatched.
    NotYetValid,
    /// A deferred value was accessed after its batch failed to dispatch.
    ValueInvalidated(String),
    /// No client builder is registered for the URI scheme.
    UnknownScheme(String),
    /// A node-listing pattern failed to compile.
    InvalidRegex(String),
    /// A node operation was issued before the tree was claimed by a
    /// hardware interface, or after its client was dropped.
    NoClientBound(String),
    /// Wrapper around an I/O error from the socket layer.
    Io(io::Error),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoBranchFoundWithGivenUID { path, partial_match } => match partial_match {
                Some(prefix) => write!(
                    f,
                    "No branch found with ID-path '{}'; longest partial match is '{}'",
                    path, prefix
                ),
                None => write!(
                    f,
                    "No branch found with ID-path '{}'; not even a partial match exists. \
                     If this address looks correct, please check for leading, trailing and \
                     stray whitespace",
                    path
                ),
            },
            ErrorKind::ReadAccessDenied(node) => {
                write!(f, "Node '{}': permissions deny read access", node)
            }
            ErrorKind::WriteAccessDenied(node) => {
                write!(f, "Node '{}': permissions deny write access", node)
            }
            ErrorKind::BulkTransferOnSingleRegister(node) => {
                write!(f, "Bulk transfer requested on single-register node '{}'", node)
            }
            ErrorKind::BulkTransferRequestedTooLarge { node, requested, size } => write!(
                f,
                "Requested bulk transfer of {} words on node '{}', which exposes only {} words",
                requested, node, size
            ),
            ErrorKind::XmlFileMissingRequiredParameters(detail) => {
                write!(f, "XMLfileMissingRequiredParameters: {}", detail)
            }
            ErrorKind::ControlHubTargetTimeout => {
                write!(f, "The target device did not respond to the ControlHub")
            }
            ErrorKind::ControlHubInternalTimeout => {
                write!(f, "Timeout in communication between processes within the ControlHub")
            }
            ErrorKind::ControlHubReportedError(code) => {
                write!(f, "The ControlHub reported error code {:#06x}", code)
            }
            ErrorKind::IpbusValidationFailed(detail) => {
                write!(f, "Reply header validation failed: {}", detail)
            }
            ErrorKind::TransportTimeout => {
                write!(f, "The transport timed out waiting for a reply")
            }
            ErrorKind::NotYetValid => {
                write!(f, "Deferred value accessed before its batch was dispatched")
            }
            ErrorKind::ValueInvalidated(cause) => {
                write!(f, "Deferred value invalidated by a failed dispatch: {}", cause)
            }
            ErrorKind::UnknownScheme(scheme) => {
                write!(f, "No client builder registered for URI scheme '{}'", scheme)
            }
            ErrorKind::InvalidRegex(detail) => {
                write!(f, "Node-listing pattern did not compile: {}", detail)
            }
            ErrorKind::NoClientBound(node) => {
                write!(f, "Node '{}' is not claimed by any hardware interface", node)
            }
            ErrorKind::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        // Receive timeouts surface as WouldBlock (non-blocking sockets) or
        // TimedOut depending on platform; both mean the reply never came.
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ErrorKind::TransportTimeout,
            _ => ErrorKind::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_miss_names_partial_match() {
        let err = ErrorKind::NoBranchFoundWithGivenUID {
            path: "a.b.d".to_string(),
            partial_match: Some("a.b".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.b.d"));
        assert!(msg.contains("'a.b'"));
    }

    #[test]
    fn test_io_timeout_maps_to_transport_timeout() {
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "recv timed out");
        assert!(matches!(ErrorKind::from(timed_out), ErrorKind::TransportTimeout));

        let would_block = io::Error::new(io::ErrorKind::WouldBlock, "no data");
        assert!(matches!(ErrorKind::from(would_block), ErrorKind::TransportTimeout));

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(ErrorKind::from(refused), ErrorKind::Io(_)));
    }
}
