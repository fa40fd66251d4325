pub mod backoff;
pub mod http;
pub mod shutdown;

pub use backoff::Backoff;
pub use shutdown::{shutdown_pair, ShutdownSignal, ShutdownTrigger};
