pub mod error;
pub mod memory;
pub mod query;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{Precondition, ResultOrder, ResultQuery, ResultUpdate};
pub use store::SchedulerStore;
