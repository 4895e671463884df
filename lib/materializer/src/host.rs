use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use tokio::runtime::Handle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("no tokio runtime is available to host execution units")]
    NoRuntime,
    #[error("dispatcher `{0}` is not configured")]
    UnknownDispatcher(String),
}

/// Fully supervised body of an execution unit, ready to be driven to completion.
pub type UnitBody = BoxFuture<'static, ()>;

/// Creates named execution units on named dispatchers.
///
/// The materializer only ever hands over bodies that are already wrapped in supervision, so a
/// host is free to run them however it likes as long as each one is driven to completion.
pub trait ExecutionHost: fmt::Debug + Send + Sync + 'static {
    fn has_dispatcher(&self, dispatcher: &str) -> bool;

    fn spawn_unit(&self, name: &str, dispatcher: &str, body: UnitBody) -> Result<(), HostError>;
}

/// Hosts every execution unit as a tokio task; dispatchers are runtime handles.
#[derive(Debug, Clone)]
pub struct TokioExecutionHost {
    dispatchers: HashMap<String, Handle>,
}

impl TokioExecutionHost {
    pub const DEFAULT_DISPATCHER: &'static str = "default";

    pub fn new(default: Handle) -> Self {
        Self {
            dispatchers: HashMap::from([(Self::DEFAULT_DISPATCHER.to_owned(), default)]),
        }
    }

    /// Host whose default dispatcher is the runtime of the calling context.
    pub fn current() -> Result<Self, HostError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| HostError::NoRuntime)
    }

    pub fn with_dispatcher(mut self, name: impl Into<String>, handle: Handle) -> Self {
        self.dispatchers.insert(name.into(), handle);
        self
    }
}

impl ExecutionHost for TokioExecutionHost {
    fn has_dispatcher(&self, dispatcher: &str) -> bool {
        self.dispatchers.contains_key(dispatcher)
    }

    fn spawn_unit(&self, name: &str, dispatcher: &str, body: UnitBody) -> Result<(), HostError> {
        let handle = self
            .dispatchers
            .get(dispatcher)
            .ok_or_else(|| HostError::UnknownDispatcher(dispatcher.to_owned()))?;
        tracing::trace!(unit = name, dispatcher, "spawning execution unit");
        handle.spawn(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::FutureExt;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn spawns_on_known_dispatchers_only() {
        let host = TokioExecutionHost::current()
            .unwrap()
            .with_dispatcher("io", Handle::current());
        assert!(host.has_dispatcher("default"));
        assert!(host.has_dispatcher("io"));
        assert!(!host.has_dispatcher("blocking"));

        let (tx, rx) = oneshot::channel();
        host.spawn_unit("unit-1", "io", async move { tx.send(42).unwrap() }.boxed())
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);

        assert_matches!(
            host.spawn_unit("unit-2", "blocking", async {}.boxed()),
            Err(HostError::UnknownDispatcher(name)) if name == "blocking"
        );
    }

    #[test]
    fn current_requires_runtime() {
        assert_matches!(TokioExecutionHost::current(), Err(HostError::NoRuntime));
    }
}
