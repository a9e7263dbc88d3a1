pub mod event;
pub mod id;
pub mod log;
pub mod resource;
pub mod tasks;
pub mod time;

pub use event::{EventDispatcher, TimerId};
pub use id::{IdManager, SyncIdManager};
pub use resource::{SharedResource, WeakResource};
pub use tasks::{PoolHandle, TaskFuture, ThreadPool};
pub use time::{Clock, ManualClock, SystemClock};
