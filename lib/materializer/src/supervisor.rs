use crate::error::AbruptTerminationFailure;
use crate::graph::{StageBody, UnitDescription};
use crate::host::{ExecutionHost, HostError};
use crate::metrics::{METRICS, UnitOutcome};
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("supervisor `{0}` has been terminated")]
    Terminated(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// One or more stages that run together on a single execution unit.
pub struct ExecutionUnit {
    name: String,
    dispatcher: String,
    stages: Vec<(String, StageBody)>,
}

impl ExecutionUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &str {
        &self.dispatcher
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .field("stages", &self.stage_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Groups declared stages into execution units.
///
/// With fusing enabled, consecutive stages on the same dispatcher share a unit; a stage marked as
/// an async boundary always starts a new one. Without fusing every stage gets its own unit.
pub fn fuse(units: Vec<UnitDescription>, auto_fusing: bool) -> Vec<ExecutionUnit> {
    let mut fused: Vec<ExecutionUnit> = Vec::new();
    for unit in units {
        if auto_fusing
            && !unit.async_boundary
            && let Some(last) = fused.last_mut()
            && last.dispatcher == unit.dispatcher
        {
            last.stages.push((unit.name, unit.body));
            continue;
        }
        fused.push(ExecutionUnit {
            name: unit.name.clone(),
            dispatcher: unit.dispatcher,
            stages: vec![(unit.name, unit.body)],
        });
    }
    fused
}

enum SupervisorState {
    Active,
    Terminated,
}

/// Root of every execution unit a materializer created.
///
/// Spawning and termination go through the same lock: a batch of units is either spawned
/// entirely before termination (and then torn down with everything else) or rejected.
pub struct StreamSupervisor {
    name: String,
    host: Arc<dyn ExecutionHost>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    state: Mutex<SupervisorState>,
    teardowns: AtomicUsize,
}

impl StreamSupervisor {
    pub fn new(name: impl Into<String>, host: Arc<dyn ExecutionHost>) -> Self {
        Self {
            name: name.into(),
            host,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: Mutex::new(SupervisorState::Active),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &Arc<dyn ExecutionHost> {
        &self.host
    }

    pub fn is_terminated(&self) -> bool {
        matches!(*self.state.lock(), SupervisorState::Terminated)
    }

    /// Spawns `units` as one batch. `on_spawned` runs before a concurrent [`Self::terminate`]
    /// can proceed, so whatever it registers is seen by the teardown.
    pub fn spawn_all<F>(&self, units: Vec<ExecutionUnit>, on_spawned: F) -> Result<(), SpawnError>
    where
        F: FnOnce(),
    {
        let state = self.state.lock();
        if matches!(*state, SupervisorState::Terminated) {
            return Err(SpawnError::Terminated(self.name.clone()));
        }

        // Cancelling this token stops only the units of this batch.
        let batch = self.cancel.child_token();
        for unit in units {
            let name = unit.name.clone();
            let dispatcher = unit.dispatcher.clone();
            let fused_stages = unit.stages.len();
            let body = self.tracker.track_future(supervise(unit, batch.clone()));
            if let Err(err) = self.host.spawn_unit(&name, &dispatcher, body.boxed()) {
                tracing::error!(
                    supervisor = %self.name,
                    unit = %name,
                    dispatcher = %dispatcher,
                    "failed to spawn execution unit, stopping its siblings: {err}"
                );
                batch.cancel();
                return Err(err.into());
            }
            METRICS.units_spawned.inc();
            if fused_stages > 1 {
                METRICS.fused_stages.inc_by(fused_stages as u64);
            }
        }
        on_spawned();
        drop(state);
        Ok(())
    }

    /// Tears down every unit. Returns `true` for the one call that actually did it.
    pub fn terminate(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SupervisorState::Terminated) {
            return false;
        }
        *state = SupervisorState::Terminated;
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        self.tracker.close();
        tracing::info!(
            supervisor = %self.name,
            active_units = self.tracker.len(),
            "tearing down execution units"
        );
        true
    }

    /// Resolves once the supervisor was terminated and all of its units have stopped.
    pub async fn terminated(&self) {
        self.tracker.wait().await
    }

    pub fn active_units(&self) -> usize {
        self.tracker.len()
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("name", &self.name)
            .field("terminated", &self.is_terminated())
            .field("active_units", &self.active_units())
            .finish()
    }
}

async fn supervise(unit: ExecutionUnit, cancel: CancellationToken) {
    let ExecutionUnit { name, stages, .. } = unit;
    let unit_name = name.as_str();
    let stages = stages.into_iter().map(|(stage, body)| async move {
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => {
                tracing::debug!(unit = unit_name, stage = %stage, "stage completed");
                METRICS.unit_outcomes[&UnitOutcome::Completed].inc();
            }
            Ok(Err(err)) => {
                tracing::error!(unit = unit_name, stage = %stage, "stage failed: {err:#}");
                METRICS.unit_outcomes[&UnitOutcome::Failed].inc();
            }
            Err(_) => {
                let failure = AbruptTerminationFailure::new(stage.as_str());
                tracing::error!(unit = unit_name, stage = %stage, "stage panicked: {failure}");
                METRICS.unit_outcomes[&UnitOutcome::Panicked].inc();
            }
        }
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(unit = unit_name, "execution unit cancelled");
            METRICS.unit_outcomes[&UnitOutcome::Cancelled].inc();
        }
        _ = join_all(stages) => {}
    }
}
