#![allow(missing_docs)]

pub mod config;
pub mod copy;
pub mod error;
pub mod kernel;
pub mod locate;
pub mod telemetry;

#[cfg(test)]
mod fake_kernel;


pub use config::{PrylockConfig, ResolveConfig, ScanConfig, load_yaml_file};
pub use copy::{CopyReport, copy_handle_to, copy_locked_file};
pub use error::{ErrorCode, PrylockError};
#[cfg(windows)]
pub use kernel::nt::NtKernel;
pub use kernel::{HandleRecord, Kernel, OwnedHandle};
pub use locate::{LocatedFile, locate_locked_file};
