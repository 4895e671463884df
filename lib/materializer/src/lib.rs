mod attributes;
mod buffer;
mod completion;
mod config;
mod error;
mod graph;
mod host;
mod materializer;
mod metrics;
mod names;
mod orphan;
mod settings;
mod subscription_timeout;
mod substream;
mod supervision;
mod supervisor;
mod timer;

pub use attributes::{Attribute, Attributes};
pub use buffer::StreamBuffer;
pub use completion::{CompletionSender, StreamCompletion, StreamFailure, completion_signal};
pub use config::{MaterializerConfig, MaterializerDebugConfig, SubscriptionTimeoutConfig};
pub use error::{AbruptTerminationFailure, IllegalStateError, MaterializationFailure};
pub use graph::{GraphDescription, Shape, StageBody, StageContext, UnitDescription, WiringContext};
pub use host::{ExecutionHost, HostError, TokioExecutionHost, UnitBody};
pub use materializer::{Materializer, TokioMaterializer, TokioMaterializerBuilder};
pub use names::NameAllocator;
pub use orphan::{
    AttachmentState, EndpointState, OrphanEndpoint, OrphanRegistration,
    SubscriptionTimeoutSupervisor,
};
pub use settings::{InputBuffer, MaterializerSettings, SettingsError};
pub use subscription_timeout::{SubscriptionTimeoutMode, SubscriptionTimeoutSettings};
pub use substream::{AttachError, SubstreamSource};
pub use supervision::{Directive, SupervisionDecider};
pub use supervisor::{ExecutionUnit, SpawnError, StreamSupervisor, fuse};
pub use timer::{Cancellable, TimerService};
