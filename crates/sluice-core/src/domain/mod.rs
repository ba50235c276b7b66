//! Domain model (IDs, stages, tasks, documents, errors).

pub mod document;
pub mod errors;
pub mod ids;
pub mod stage;
pub mod state;
pub mod task;
pub mod worker_identity;

pub use self::document::Document;
pub use self::errors::{ErrorKind, HandlerError, StoreError};
pub use self::ids::{DocumentId, Id, IdMarker, ParseIdError, TaskId};
pub use self::stage::{Pipeline, Stage};
pub use self::state::TaskStatus;
pub use self::task::{Enqueued, Task, TaskCounts, TaskFailure, TaskPayload, TaskResult};
pub use self::worker_identity::{ParseIdentityError, WorkerIdentity};
