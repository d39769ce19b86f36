//! Shared filesystem helpers.

pub mod files;
pub mod temp;

pub use files::{
    append_line_if_missing, backup_once, sha256_file, verify_checksum_sidecar, write_checksum_sidecar,
    write_file_mode, write_file_with_dirs,
};
pub use temp::{cleanup_work_dir, prepare_work_dir};
