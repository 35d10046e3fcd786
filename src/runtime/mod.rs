pub mod gc;
pub mod worker_pool;

pub use gc::GcSweeper;
pub use worker_pool::WorkerPool;
