use std::error::Error as StdError;

/// Raised when an execution unit playing a publisher, subscriber or processor role disappears
/// without signalling completion, failure or cancellation, typically because its host was torn
/// down underneath it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution unit `{endpoint}` terminated abruptly")]
pub struct AbruptTerminationFailure {
    endpoint: String,
}

impl AbruptTerminationFailure {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Identity of the unit that went away.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Operation attempted on a materializer that no longer accepts work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IllegalStateError {
    #[error("materializer has been shut down")]
    ShutDown,
}

/// Graph construction or wiring could not proceed.
///
/// This is the only error `Materializer::materialize` surfaces; failures of already running
/// stages are routed to the stage's supervision decider instead.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct MaterializationFailure {
    message: String,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl MaterializationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        cause: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub(crate) fn shut_down() -> Self {
        Self::with_cause(
            "cannot materialize a graph: materializer has been shut down",
            IllegalStateError::ShutDown,
        )
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the attempt was rejected because the materializer is shut down.
    pub fn is_shut_down(&self) -> bool {
        self.cause
            .as_deref()
            .and_then(|cause| cause.downcast_ref::<IllegalStateError>())
            .is_some_and(|err| *err == IllegalStateError::ShutDown)
    }
}
