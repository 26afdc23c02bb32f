//! Infrastructure layer for the Currens runtime.
//!
//! Contains OS-facing adapters: TCP sockets and the tasks that service them,
//! and file-system storage for the configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `currens_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
