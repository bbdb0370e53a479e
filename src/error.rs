//! Error taxonomy of the simulator.
//!
//! Backpressure is never an error: it is the `Denied` outcome of a request.
//! Everything in this module is a fatal condition that halts the whole run
//! with a diagnostic naming the offending component.

use thiserror::Error;

use crate::config::ConfigError;
use crate::types::{EventId, PortId};

/// Fatal simulation errors.
#[derive(Error, Debug)]
pub enum SimError {
    /// A component detected a protocol or model violation.
    #[error("[{component}] {message}")]
    Fatal {
        /// Hierarchical path of the component that raised the error
        component: String,
        /// Human-readable diagnostic
        message: String,
    },

    /// A request reached a component that is already executing higher up
    /// in the same synchronous call chain.
    #[error("re-entrant call into {component} from {caller}")]
    Reentrant {
        /// The component that could not be entered
        component: String,
        /// The caller that issued the request
        caller: String,
    },

    /// A port was used without being bound to a peer.
    #[error("port {port} of {component} is not bound")]
    Unbound {
        /// Component owning the port
        component: String,
        /// Name of the port
        port: String,
    },

    /// An invalid port index was used by a component.
    #[error("{component} has no port with index {port}")]
    UnknownPort {
        /// Component that used the index
        component: String,
        /// The offending index
        port: PortId,
    },

    /// A component received an event it does not handle.
    #[error("{component} received unknown event {event}")]
    UnknownEvent {
        /// Component that received the event
        component: String,
        /// The unhandled event identifier
        event: EventId,
    },

    /// Port binding failed during topology construction.
    #[error("binding error: {0}")]
    Binding(String),

    /// Component lookup failed.
    #[error("no component at path '{0}'")]
    NoSuchComponent(String),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SimError {
    /// Creates a fatal error attributed to `component`.
    pub fn fatal(component: impl Into<String>, message: impl Into<String>) -> Self {
        SimError::Fatal {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error was raised by a model as a fatal diagnostic.
    pub fn is_fatal_diagnostic(&self) -> bool {
        matches!(self, SimError::Fatal { .. })
    }

    /// Returns the component path the error is attributed to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            SimError::Fatal { component, .. }
            | SimError::Reentrant { component, .. }
            | SimError::Unbound { component, .. }
            | SimError::UnknownPort { component, .. }
            | SimError::UnknownEvent { component, .. } => Some(component),
            _ => None,
        }
    }
}

/// Result type used by every simulation callback.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_display() {
        let err = SimError::fatal("chip/redmule", "INVALID configuration (M-N-K): 0, 4, 4");
        assert_eq!(
            err.to_string(),
            "[chip/redmule] INVALID configuration (M-N-K): 0, 4, 4"
        );
        assert!(err.is_fatal_diagnostic());
        assert_eq!(err.component(), Some("chip/redmule"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: SimError = ConfigError::MissingKey("radix".to_string()).into();
        assert!(!err.is_fatal_diagnostic());
        assert!(err.to_string().contains("radix"));
        assert_eq!(err.component(), None);
    }
}
