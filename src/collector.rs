//! Collector subsystem: the central process agents stream to.
//!
//! Re-exports:
//! - [`Dispatcher`]: accept loop of the registration/capture service.
//! - [`ExceptionServer`]: auxiliary HTTP surface (exception list, endpoint
//!   snapshot).

pub mod dispatcher;
pub mod exception_server;
#[cfg(test)]
pub mod integration_tests;

pub use dispatcher::Dispatcher;
pub use exception_server::ExceptionServer;
