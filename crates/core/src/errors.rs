use thiserror::Error;

/// Classification every failure is reduced to before the queue is told
/// whether to redeliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    TransientDependency,
    PermanentDependency,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientDependency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::TransientDependency => "transient_dependency",
            Self::PermanentDependency => "permanent_dependency",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient dependency failure: {0}")]
    TransientDependency(String),
    #[error("permanent dependency failure: {0}")]
    PermanentDependency(String),
    #[error("processing deadline of {secs}s exceeded")]
    DeadlineExceeded { secs: u64 },
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TransientDependency(_) | Self::DeadlineExceeded { .. } => {
                ErrorKind::TransientDependency
            }
            Self::PermanentDependency(_) => ErrorKind::PermanentDependency,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => Self::Validation(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::TransientDependency => Self::TransientDependency(message),
            ErrorKind::PermanentDependency => Self::PermanentDependency(message),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "The request signature could not be verified.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Validation(message) | ApplicationError::NotFound(message) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::TransientDependency(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::DeadlineExceeded { secs } => Self::ServiceUnavailable {
                message: format!("deadline of {secs}s exceeded"),
                correlation_id,
            },
            ApplicationError::PermanentDependency(message) => {
                Self::Internal { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, ErrorKind, InterfaceError};

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ApplicationError::TransientDependency("rate limited".to_owned()).is_retryable());
        assert!(ApplicationError::DeadlineExceeded { secs: 300 }.is_retryable());
        assert!(!ApplicationError::Validation("bad payload".to_owned()).is_retryable());
        assert!(!ApplicationError::NotFound("no registration".to_owned()).is_retryable());
        assert!(!ApplicationError::PermanentDependency("invalid_auth".to_owned()).is_retryable());
    }

    #[test]
    fn from_kind_round_trips_classification() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::TransientDependency,
            ErrorKind::PermanentDependency,
        ] {
            assert_eq!(ApplicationError::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn validation_error_maps_to_bad_request_with_correlation_id() {
        let interface =
            ApplicationError::Validation("missing action".to_owned()).into_interface("trace-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "trace-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn transient_error_maps_to_service_unavailable() {
        let interface = ApplicationError::TransientDependency("database lock timeout".to_owned())
            .into_interface("trace-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "trace-2");
    }

    #[test]
    fn permanent_dependency_error_maps_to_internal() {
        let interface = ApplicationError::PermanentDependency("invalid_auth".to_owned())
            .into_interface("trace-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
