use crate::metrics::METRICS;
use crate::subscription_timeout::{SubscriptionTimeoutMode, SubscriptionTimeoutSettings};
use crate::timer::{Cancellable, TimerService};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Waiting for a peer.
    Pending,
    /// A peer took over the endpoint.
    Attached,
    /// The subscription timeout cancelled the endpoint.
    Cancelled,
}

const PENDING: u8 = 0;
const ATTACHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Atomic `Pending -> Attached | Cancelled` transition shared by an endpoint and the sweep.
///
/// Exactly one of `try_attach` and `try_cancel` can ever succeed.
#[derive(Debug)]
pub struct AttachmentState(AtomicU8);

impl Default for AttachmentState {
    fn default() -> Self {
        Self(AtomicU8::new(PENDING))
    }
}

impl AttachmentState {
    pub fn load(&self) -> EndpointState {
        match self.0.load(Ordering::Acquire) {
            PENDING => EndpointState::Pending,
            ATTACHED => EndpointState::Attached,
            _ => EndpointState::Cancelled,
        }
    }

    /// On failure returns the state that won.
    pub fn try_attach(&self) -> Result<(), EndpointState> {
        self.transition(ATTACHED)
    }

    pub fn try_cancel(&self) -> Result<(), EndpointState> {
        self.transition(CANCELLED)
    }

    fn transition(&self, to: u8) -> Result<(), EndpointState> {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| self.load())
    }
}

/// Endpoint of a half-connected pipeline that may be reclaimed by the subscription timeout.
pub trait OrphanEndpoint: Send + Sync + 'static {
    fn endpoint_id(&self) -> &str;

    fn state(&self) -> EndpointState;

    /// Cancels the endpoint if no peer has attached yet, releasing buffered elements and upstream
    /// demand. Returns whether this call performed the cancellation.
    fn cancel_orphan(&self) -> bool;

    /// Hands the endpoint its registration so it can deregister itself when a peer attaches.
    fn on_registered(&self, registration: OrphanRegistration) {
        let _ = registration;
    }
}

struct Entry {
    endpoint: Arc<dyn OrphanEndpoint>,
    deadline: Instant,
    mode: SubscriptionTimeoutMode,
}

type Registry = Mutex<HashMap<u64, Entry>>;

/// Ticket for one registered orphan.
pub struct OrphanRegistration {
    id: u64,
    registry: Weak<Registry>,
}

impl OrphanRegistration {
    /// Removes the orphan from the registry. Returns `false` if it was already gone.
    pub fn cancel(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.lock().remove(&self.id).is_some())
    }
}

impl fmt::Debug for OrphanRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrphanRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// Tracks orphaned endpoints and applies the subscription timeout mode to the ones nobody
/// attached to in time.
pub struct SubscriptionTimeoutSupervisor {
    registry: Arc<Registry>,
    next_id: AtomicU64,
    sweep: Cancellable,
}

impl SubscriptionTimeoutSupervisor {
    /// Starts the periodic sweep on `timer`.
    pub fn start(timer: &TimerService, sweep_interval: Duration) -> Self {
        let registry: Arc<Registry> = Arc::default();
        let weak = Arc::downgrade(&registry);
        let sweep = timer.schedule_repeatedly(sweep_interval, sweep_interval, move || {
            if let Some(registry) = weak.upgrade() {
                sweep_expired(&registry);
            }
        });
        Self {
            registry,
            next_id: AtomicU64::new(0),
            sweep,
        }
    }

    pub fn register(&self, endpoint: Arc<dyn OrphanEndpoint>, settings: SubscriptionTimeoutSettings) {
        if !settings.is_enforced() {
            tracing::trace!(
                endpoint = endpoint.endpoint_id(),
                "subscription timeout disabled, orphan not tracked"
            );
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + settings.timeout();
        tracing::debug!(
            endpoint = endpoint.endpoint_id(),
            timeout = ?settings.timeout(),
            mode = %settings.mode(),
            "tracking orphaned endpoint"
        );
        self.registry.lock().insert(
            id,
            Entry {
                endpoint: endpoint.clone(),
                deadline,
                mode: settings.mode(),
            },
        );
        METRICS.orphans_registered.inc();
        endpoint.on_registered(OrphanRegistration {
            id,
            registry: Arc::downgrade(&self.registry),
        });
    }

    pub fn pending_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Stops sweeping and forgets every tracked orphan.
    pub fn stop(&self) {
        self.sweep.cancel();
        self.registry.lock().clear();
    }
}

impl fmt::Debug for SubscriptionTimeoutSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTimeoutSupervisor")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Drop for SubscriptionTimeoutSupervisor {
    fn drop(&mut self) {
        self.sweep.cancel();
    }
}

fn sweep_expired(registry: &Registry) {
    let now = Instant::now();
    let expired: Vec<Entry> = {
        let mut registry = registry.lock();
        let ids: Vec<u64> = registry
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| registry.remove(&id))
            .collect()
    };

    for entry in expired {
        let endpoint = entry.endpoint.endpoint_id();
        if entry.endpoint.state() != EndpointState::Pending {
            continue;
        }
        match entry.mode {
            SubscriptionTimeoutMode::Noop => {}
            SubscriptionTimeoutMode::Warn => {
                tracing::warn!(
                    endpoint,
                    "no subscriber attached to endpoint within the subscription timeout"
                );
                METRICS.orphans_timed_out[&entry.mode].inc();
            }
            SubscriptionTimeoutMode::Cancel => {
                // a peer attaching concurrently wins the state transition
                if entry.endpoint.cancel_orphan() {
                    tracing::info!(
                        endpoint,
                        "cancelled endpoint after subscription timeout"
                    );
                    METRICS.orphans_timed_out[&entry.mode].inc();
                }
            }
        }
    }
}
