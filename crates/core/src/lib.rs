pub mod affect;
pub mod attention;
pub mod config;
pub mod consensus;
pub mod error;
pub mod io;
pub mod memory;
pub mod persistence;
pub mod runtime;
pub mod types;
pub mod workers;
