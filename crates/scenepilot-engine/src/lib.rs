pub mod applier;
pub mod confirm;
pub mod host;
pub mod interpreter;
pub mod memory;
pub mod scheduler;
pub mod service;
pub mod snapshot;

pub use applier::{
    ActionApplier, ApplierConfig, BatchError, BatchOutcome, BatchScope, BatchStepError,
    OverlapPolicy, UndoMethod, UndoOutcome,
};
pub use confirm::{AutoApprove, AutoDeny, Confirm, ConfirmationRequest};
pub use host::{Entity, EntityHandle, HostError, HostGraph};
pub use memory::{MemoryHost, Scene, SceneNode};
pub use scheduler::{ContextHandle, OwningContext, ScheduleError};
pub use service::ActionService;
pub use snapshot::{RestoreReport, SnapshotConfig, SnapshotDiff, SnapshotEngine, SnapshotError};
