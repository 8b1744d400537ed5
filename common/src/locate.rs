use std::path::Path;

use crate::config::PrylockConfig;
use crate::error::PrylockError;
use crate::kernel::{Kernel, OwnedHandle};

/// A live handle to the target file, duplicated out of the owning process.
/// The handle is owned by the caller from here on.
#[derive(Debug)]
pub struct LocatedFile<'k> {
    pub owner_pid: u32,
    pub handle: OwnedHandle<'k>,
}

/// Reduces a user-supplied absolute path to the suffix a kernel object name
/// would carry: no `\\?\` prefix, backslash separators, and no drive-letter
/// or UNC `\\server` prefix. Kernel names look like
/// `\Device\HarddiskVolume3\Users\a\data.db`, so only the rooted remainder
/// can ever compare equal.
#[allow(clippy::missing_errors_doc)]
pub fn kernel_suffix(target: &Path) -> Result<String, PrylockError> {
    let raw = target.as_os_str().to_string_lossy().replace('/', "\\");
    let unverbatim = raw.strip_prefix("\\\\?\\").unwrap_or(raw.as_str());

    let suffix = if let Some(rest) = strip_drive(unverbatim) {
        rest
    } else if let Some(rest) = strip_unc_server(unverbatim) {
        rest
    } else {
        unverbatim
    };

    if suffix.len() < 2 || !suffix.starts_with('\\') {
        return Err(PrylockError::InvalidPath {
            path: target.to_path_buf(),
        });
    }
    Ok(suffix.to_string())
}

fn strip_drive(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        Some(&path[2..])
    } else {
        None
    }
}

fn strip_unc_server(path: &str) -> Option<&str> {
    let rest = path
        .strip_prefix("\\\\")
        .or_else(|| path.strip_prefix("UNC\\"))?;
    let sep = rest.find('\\')?;
    Some(&rest[sep..])
}

/// Exact, case-preserving suffix comparison. The suffix always begins with
/// `\`, so a match cannot start in the middle of a path segment.
#[must_use]
pub fn name_matches(resolved: &str, kernel_suffix: &str) -> bool {
    resolved.ends_with(kernel_suffix)
}

/// Walks one system handle snapshot looking for `target`. Per candidate:
/// open the owner, duplicate the handle, resolve its object name, compare.
/// Every failure along the way is expected scan noise (the owner exited, the
/// handle closed, the process is protected) and skips to the next record;
/// only the snapshot itself can fail the search. The first matching
/// duplicated handle is transferred to the caller unclosed; all other
/// handles are closed before the next candidate is probed.
#[allow(clippy::missing_errors_doc)]
pub fn locate_locked_file<'k>(
    kernel: &'k dyn Kernel,
    config: &PrylockConfig,
    target: &Path,
) -> Result<LocatedFile<'k>, PrylockError> {
    let suffix = kernel_suffix(target)?;
    let records = kernel.handle_snapshot()?;

    let mut opened = 0usize;
    let mut duplicated = 0usize;
    let mut resolved = 0usize;

    for record in &records {
        if config
            .resolve
            .skip_object_types
            .contains(&record.object_type_index)
        {
            continue;
        }

        let Ok(owner_raw) = kernel.open_process_for_duplication(record.owner_pid) else {
            continue;
        };
        let owner = OwnedHandle::from_raw(kernel, owner_raw);
        opened += 1;

        let Ok(candidate_raw) = kernel.duplicate_to_current(owner.get(), record.handle_value)
        else {
            continue;
        };
        let candidate = OwnedHandle::from_raw(kernel, candidate_raw);
        duplicated += 1;

        let Ok(name) = kernel.object_name(candidate.get()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        resolved += 1;

        if name_matches(name.as_str(), suffix.as_str()) {
            tracing::info!(
                owner_pid = record.owner_pid,
                records = records.len(),
                opened,
                duplicated,
                resolved,
                "located a live handle for the target file"
            );
            return Ok(LocatedFile {
                owner_pid: record.owner_pid,
                handle: candidate,
            });
        }
    }

    tracing::debug!(
        records = records.len(),
        opened,
        duplicated,
        resolved,
        "target not held open by any process"
    );
    Err(PrylockError::NotFound {
        path: target.to_path_buf(),
    })
}
