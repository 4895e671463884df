use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_materializer::{
    ExecutionHost, HostError, MaterializerSettings, TokioExecutionHost, TokioMaterializer,
    UnitBody,
};

/// Materializer wired to a host that counts what it is asked to spawn.
pub struct Tester {
    pub materializer: TokioMaterializer,
    pub host: Arc<CountingHost>,
}

impl Tester {
    pub fn setup() -> anyhow::Result<Self> {
        Self::with_settings(MaterializerSettings::default())
    }

    pub fn with_settings(settings: MaterializerSettings) -> anyhow::Result<Self> {
        let host = Arc::new(CountingHost::new(TokioExecutionHost::current()?));
        let materializer = TokioMaterializer::builder()
            .settings(settings)
            .host(host.clone())
            .build()?;
        Ok(Self { materializer, host })
    }

    /// Execution units spawned so far.
    pub fn spawned_units(&self) -> usize {
        self.host.spawned()
    }
}

#[derive(Debug)]
pub struct CountingHost {
    inner: TokioExecutionHost,
    spawned: AtomicUsize,
}

impl CountingHost {
    pub fn new(inner: TokioExecutionHost) -> Self {
        Self {
            inner,
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

impl ExecutionHost for CountingHost {
    fn has_dispatcher(&self, dispatcher: &str) -> bool {
        self.inner.has_dispatcher(dispatcher)
    }

    fn spawn_unit(&self, name: &str, dispatcher: &str, body: UnitBody) -> Result<(), HostError> {
        self.inner.spawn_unit(name, dispatcher, body)?;
        self.spawned.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(unit = name, "test host spawned unit");
        Ok(())
    }
}
