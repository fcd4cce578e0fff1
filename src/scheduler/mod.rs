pub mod jobs;
pub mod locks;
pub mod runner;
pub mod timers;

pub use jobs::{JobClass, JobKind};
pub use locks::LockRegistry;
pub use runner::start_jobs;
pub use timers::TimerTable;
