use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::PrylockConfig;
use crate::error::PrylockError;
use crate::kernel::{Kernel, OwnedHandle};
use crate::locate::locate_locked_file;

/// Outcome of a completed locked-file copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub owner_pid: u32,
    pub bytes_written: u64,
}

struct ViewGuard<'k> {
    ptr: *const u8,
    kernel: &'k dyn Kernel,
}

impl Drop for ViewGuard<'_> {
    fn drop(&mut self) {
        self.kernel.unmap_view(self.ptr);
    }
}

/// One read-only view over the whole source file. Field order is release
/// order: the view is unmapped first, then the mapping object is closed,
/// then the duplicated source handle — the reverse of acquisition, on every
/// exit path.
struct MappingSession<'k> {
    view: ViewGuard<'k>,
    #[allow(dead_code)]
    mapping: OwnedHandle<'k>,
    #[allow(dead_code)]
    source: OwnedHandle<'k>,
    len: u64,
}

impl<'k> MappingSession<'k> {
    fn map(kernel: &'k dyn Kernel, source: OwnedHandle<'k>) -> Result<Self, PrylockError> {
        // The exact length comes from the handle; the mapping length is
        // page-rounded and must not be trusted.
        let len = kernel.file_size(source.get())?;
        if len == 0 {
            return Err(PrylockError::EmptySource);
        }
        let mapping = OwnedHandle::from_raw(kernel, kernel.create_readonly_mapping(source.get())?);
        let view = ViewGuard {
            ptr: kernel.map_readonly_view(mapping.get())?,
            kernel,
        };
        Ok(Self {
            view,
            mapping,
            source,
            len,
        })
    }

    #[allow(unsafe_code)]
    fn bytes(&self) -> Result<&[u8], PrylockError> {
        let len = usize::try_from(self.len).map_err(|_| PrylockError::MapFailed {
            stage: "view_len",
            os_error: 0,
        })?;
        Ok(unsafe { std::slice::from_raw_parts(self.view.ptr, len) })
    }
}

/// Streams the file behind `source` into a freshly created `dest`. The
/// destination is created exclusively; a zero-length source fails with
/// `EmptySource` before anything is created, and a failed write removes the
/// partial file. The duplicated handle is consumed and closed here whatever
/// the outcome.
#[allow(clippy::missing_errors_doc)]
pub fn copy_handle_to<'k>(
    kernel: &'k dyn Kernel,
    source: OwnedHandle<'k>,
    dest: &Path,
) -> Result<u64, PrylockError> {
    let session = MappingSession::map(kernel, source)?;
    let bytes = session.bytes()?;

    let mut out = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|source| PrylockError::WriteFailed {
            path: dest.to_path_buf(),
            source,
        })?;

    if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
        drop(out);
        let _removed = fs::remove_file(dest);
        return Err(PrylockError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        });
    }

    Ok(session.len)
}

/// The produced interface: locate the process holding `source` open, steal a
/// duplicate of its handle, and copy the bytes into `dest`.
#[allow(clippy::missing_errors_doc)]
pub fn copy_locked_file(
    kernel: &dyn Kernel,
    config: &PrylockConfig,
    source: &Path,
    dest: &Path,
) -> Result<CopyReport, PrylockError> {
    let located = locate_locked_file(kernel, config, source)?;
    let owner_pid = located.owner_pid;
    let bytes_written = copy_handle_to(kernel, located.handle, dest)?;
    tracing::info!(owner_pid, bytes_written, "locked file copied");
    Ok(CopyReport {
        owner_pid,
        bytes_written,
    })
}
