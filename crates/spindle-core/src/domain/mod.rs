//! Domain model (IDs, task record, errors).
//!
//! ストアやワーカーに依存しない「形」だけを定義します。

pub mod errors;
pub mod ids;
pub mod task;

pub use errors::{HandlerError, QueueError, StoreError};
pub use ids::{Id, IdMarker, TaskId};
pub use task::{Payload, Task, TaskOptions, TaskStatus};
