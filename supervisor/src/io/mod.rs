//! I/O collaborators for the supervisor.

pub mod actor;
pub mod config;
pub mod process;
pub mod validator;
