use crate::types::ProviderKind;

/// Domain validation and lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a generation request, from configuration through to a
/// provider's terminal verdict.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The provider could not be reached (network, DNS, TLS, timeout,
    /// unreadable body).
    #[error("{provider} transport error: {message}")]
    Transport {
        provider: ProviderKind,
        message: String,
    },

    /// The provider answered but rejected the request.
    #[error("{provider} rejected the request ({status}): {body}")]
    Provider {
        provider: ProviderKind,
        /// HTTP status code, or the envelope code for providers that wrap
        /// errors in a 200 response.
        status: u16,
        /// Raw response body for diagnostics.
        body: String,
    },

    /// The job finished but was flagged as violating content policy.
    #[error("{provider} flagged the content: {reason}")]
    ContentPolicy {
        provider: ProviderKind,
        reason: String,
    },

    /// Missing credential or invalid configuration, detected before any
    /// network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Local observation of the job was cancelled.
    #[error("Cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether this failure reflects on the health of the model that
    /// produced it (as opposed to the caller's input or content).
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            GenerationError::Transport { .. } | GenerationError::Provider { .. }
        )
    }

    /// The provider the error originated from, if any.
    pub fn provider(&self) -> Option<ProviderKind> {
        match self {
            GenerationError::Transport { provider, .. }
            | GenerationError::Provider { provider, .. }
            | GenerationError::ContentPolicy { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_classification() {
        let transport = GenerationError::Transport {
            provider: ProviderKind::Sutu,
            message: "connection refused".into(),
        };
        let policy = GenerationError::ContentPolicy {
            provider: ProviderKind::Sutu,
            reason: "nsfw".into(),
        };
        let config = GenerationError::Configuration("missing key".into());

        assert!(transport.is_infrastructure());
        assert!(!policy.is_infrastructure());
        assert!(!config.is_infrastructure());
    }

    #[test]
    fn provider_error_message_carries_status_and_body() {
        let err = GenerationError::Provider {
            provider: ProviderKind::Dayu,
            status: 429,
            body: "quota exceeded".into(),
        };
        assert_eq!(
            err.to_string(),
            "dayu rejected the request (429): quota exceeded"
        );
        assert_eq!(err.provider(), Some(ProviderKind::Dayu));
    }
}
