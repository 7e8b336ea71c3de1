//! Support library for the `ferrond` binary: configuration resolution,
//! the built-in service set, and typed client wrappers for it.

pub mod config;
pub mod proxy;
pub mod service;
