//! Shared plumbing for the Changewatch services.

pub mod logging;
pub mod shutdown;

pub use shutdown::wait_for_shutdown_signal;
