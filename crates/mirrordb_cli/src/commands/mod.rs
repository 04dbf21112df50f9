//! CLI command implementations.

pub mod backup;
pub mod bootstrap;
pub mod dump;
pub mod exchange;
pub mod init;
pub mod insert;
pub mod promote;
pub mod replicate;
pub mod snapshot;
