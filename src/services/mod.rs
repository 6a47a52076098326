pub mod analysis;
pub mod memory_store;
pub mod processor;
pub mod queue;
pub mod reaper;
pub mod redis_store;
pub mod retry;
pub mod status;
pub mod store;
pub mod worker;
