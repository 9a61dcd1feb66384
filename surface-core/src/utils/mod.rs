//! Utility helpers shared by the surface crates.

pub mod fs;

pub use fs::{ensure_dir_exists, write_bytes_to_file};
