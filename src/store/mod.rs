pub mod memory;
pub mod repository;
pub mod repository_sqlx;

pub use memory::MemoryStore;
pub use repository::{DateWindow, InterestUpdate, Store};
pub use repository_sqlx::SqlxStore;
