//! Relay error types

use crate::documents::ExtractError;
use crate::provider::ProviderError;
use crate::transport::TransportError;

/// Errors surfaced by the relay core.
///
/// None of these are shown to chat users verbatim; the dispatch engine logs
/// them and substitutes a fixed message.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: usize,
        #[source]
        last: ProviderError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("document error: {0}")]
    Document(#[from] ExtractError),
}

impl RelayError {
    /// The provider error behind this failure, if any
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(e) => Some(e),
            Self::MaxRetriesExceeded { last, .. } => Some(last),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
