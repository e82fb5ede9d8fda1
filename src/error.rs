use std::fmt;

use crate::model::ModelError;

/// Boxed error type returned by hook handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug)]
pub enum HookError {
    /// Bad registration: unknown event name, malformed hook setup.
    /// Raised at configuration time, never during dispatch.
    Configuration(String),
    /// Raised by a VALIDATE- or BEFORE-phase handler to reject the
    /// operation. Aborts the whole batch before any write occurs.
    Validation { message: String },
    /// Wraps an unexpected error from a handler, preserving the cause.
    Handler { hook: String, source: BoxError },
    /// Store-level failure surfaced through a hook-aware write path.
    Storage(ModelError),
}

impl HookError {
    pub fn configuration(message: impl Into<String>) -> Self {
        HookError::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        HookError::Validation {
            message: message.into(),
        }
    }

    /// Classify an error returned by a handler: a native `HookError`
    /// (typically `Validation`) passes through unchanged, anything else is
    /// wrapped in `Handler` with the original as `source()`.
    pub(crate) fn from_handler(hook: &str, err: BoxError) -> Self {
        match err.downcast::<HookError>() {
            Ok(native) => *native,
            Err(other) => HookError::Handler {
                hook: hook.to_string(),
                source: other,
            },
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Configuration(message) => {
                write!(f, "hook configuration error: {}", message)
            }
            HookError::Validation { message } => {
                write!(f, "validation failed: {}", message)
            }
            HookError::Handler { hook, source } => {
                write!(f, "hook {} failed: {}", hook, source)
            }
            HookError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Handler { source, .. } => Some(source.as_ref()),
            HookError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelError> for HookError {
    fn from(err: ModelError) -> Self {
        HookError::Storage(err)
    }
}
