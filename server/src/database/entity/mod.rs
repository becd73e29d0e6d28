//! Database entities.

pub mod file_info;
