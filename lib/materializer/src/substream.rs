use crate::orphan::{AttachmentState, EndpointState, OrphanEndpoint, OrphanRegistration};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("substream `{0}` already has a subscriber")]
    AlreadyAttached(String),
    #[error("substream `{0}` was cancelled because nobody subscribed in time")]
    TimedOut(String),
}

/// Output of a materialized graph that is waiting for a subscriber.
///
/// Until [`SubstreamSource::attach`] is called the endpoint is an orphan: the subscription
/// timeout supervisor may cancel it, which closes the channel and drops everything buffered in it.
pub struct SubstreamSource<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    id: String,
    state: AttachmentState,
    receiver: Mutex<Option<mpsc::Receiver<T>>>,
    registration: Mutex<Option<OrphanRegistration>>,
}

impl<T> Clone for SubstreamSource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> SubstreamSource<T> {
    pub fn new(id: impl Into<String>, receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                state: AttachmentState::default(),
                receiver: Mutex::new(Some(receiver)),
                registration: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> EndpointState {
        self.inner.state.load()
    }

    /// Takes over the endpoint. Only the first caller succeeds, and only if the subscription
    /// timeout has not cancelled the endpoint first.
    pub fn attach(&self) -> Result<mpsc::Receiver<T>, AttachError> {
        let id = || self.inner.id.clone();
        match self.inner.state.try_attach() {
            Ok(()) => {}
            Err(EndpointState::Cancelled) => return Err(AttachError::TimedOut(id())),
            Err(_) => return Err(AttachError::AlreadyAttached(id())),
        }
        let receiver = self.inner.receiver.lock().take();
        if let Some(registration) = self.inner.registration.lock().take() {
            registration.cancel();
        }
        tracing::debug!(endpoint = %self.inner.id, "subscriber attached to substream");
        receiver.ok_or_else(|| AttachError::AlreadyAttached(id()))
    }

    pub fn as_orphan(&self) -> Arc<dyn OrphanEndpoint> {
        self.inner.clone()
    }
}

impl<T: Send + 'static> OrphanEndpoint for Inner<T> {
    fn endpoint_id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> EndpointState {
        self.state.load()
    }

    fn cancel_orphan(&self) -> bool {
        if self.state.try_cancel().is_err() {
            return false;
        }
        self.registration.lock().take();
        if let Some(mut receiver) = self.receiver.lock().take() {
            receiver.close();
            let mut released = 0usize;
            while receiver.try_recv().is_ok() {
                released += 1;
            }
            tracing::debug!(endpoint = %self.id, released, "released buffered elements");
        }
        true
    }

    fn on_registered(&self, registration: OrphanRegistration) {
        // attached before the registration arrived: nothing to track
        if self.state.load() != EndpointState::Pending {
            registration.cancel();
            return;
        }
        *self.registration.lock() = Some(registration);
    }
}

impl<T> fmt::Debug for SubstreamSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstreamSource")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.load())
            .finish()
    }
}
