//! Task execution infrastructure.
//!
//! Worker threads, job queues and the work-stealing pool every execution
//! context runs on.

pub mod cpu_pool;
pub mod panic_handler;
pub mod task;
pub mod worker;

pub use cpu_pool::{CpuPool, PoolHandle};
pub use panic_handler::{panic_message, PanicHandler, PanicInfo, PanicStrategy};
pub use worker::{on_worker_thread, WorkerId};
