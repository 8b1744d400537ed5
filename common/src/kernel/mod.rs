use std::fmt;

use crate::error::PrylockError;

#[cfg(windows)]
pub mod nt;

/// Process-local handle value. Only meaningful to the [`Kernel`] that
/// produced it.
pub type RawHandle = isize;

/// One entry of a system-wide handle snapshot. Valid only for the scan that
/// produced it: the referenced handle may already be closed by the time the
/// record is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRecord {
    pub owner_pid: u32,
    pub handle_value: usize,
    pub object_type_index: u16,
    pub granted_access: u32,
}

/// The OS seam. Everything the locator and copier need from the kernel goes
/// through this trait, so tests can substitute a deterministic fake for the
/// system handle table.
pub trait Kernel {
    #[allow(clippy::missing_errors_doc)]
    fn handle_snapshot(&self) -> Result<Vec<HandleRecord>, PrylockError>;

    /// Opens a process with the duplicate-handle right only.
    #[allow(clippy::missing_errors_doc)]
    fn open_process_for_duplication(&self, pid: u32) -> Result<RawHandle, PrylockError>;

    /// Duplicates `handle_value` out of `owner_process` into the current
    /// process, keeping the source access mask.
    #[allow(clippy::missing_errors_doc)]
    fn duplicate_to_current(
        &self,
        owner_process: RawHandle,
        handle_value: usize,
    ) -> Result<RawHandle, PrylockError>;

    /// Best-effort kernel object name for a local handle. An empty string is
    /// a valid outcome; callers treat both failure and emptiness as
    /// "no match".
    #[allow(clippy::missing_errors_doc)]
    fn object_name(&self, handle: RawHandle) -> Result<String, PrylockError>;

    /// Exact byte length of the file behind `file`, taken from the handle
    /// itself rather than from any page-rounded mapping size.
    #[allow(clippy::missing_errors_doc)]
    fn file_size(&self, file: RawHandle) -> Result<u64, PrylockError>;

    #[allow(clippy::missing_errors_doc)]
    fn create_readonly_mapping(&self, file: RawHandle) -> Result<RawHandle, PrylockError>;

    #[allow(clippy::missing_errors_doc)]
    fn map_readonly_view(&self, mapping: RawHandle) -> Result<*const u8, PrylockError>;

    fn unmap_view(&self, view: *const u8);

    fn close_handle(&self, handle: RawHandle);
}

/// Drop-based owner of a [`RawHandle`]: exactly one close, on scope exit,
/// whatever the exit path. Moving the value transfers that duty.
pub struct OwnedHandle<'k> {
    raw: RawHandle,
    kernel: &'k dyn Kernel,
}

impl<'k> OwnedHandle<'k> {
    pub fn from_raw(kernel: &'k dyn Kernel, raw: RawHandle) -> Self {
        Self { raw, kernel }
    }

    #[must_use]
    pub fn get(&self) -> RawHandle {
        self.raw
    }
}

impl fmt::Debug for OwnedHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle").field("raw", &self.raw).finish()
    }
}

impl Drop for OwnedHandle<'_> {
    fn drop(&mut self) {
        self.kernel.close_handle(self.raw);
    }
}

/// Outcome of one attempt of a growable kernel query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The call succeeded and wrote `written` bytes.
    Done { written: usize },
    /// The buffer was too small; `required` carries the kernel-reported
    /// length when one was given.
    TooSmall { required: Option<usize> },
    /// The call failed for a reason unrelated to buffer sizing.
    Failed { status: i32 },
}

/// Runs `query` until it fits: on [`QueryStatus::TooSmall`] the buffer grows
/// to the reported length, or doubles when the kernel gave no hint, and the
/// call is retried. There is no retry cap beyond available memory; the
/// snapshot target can keep growing between attempts and the loop follows it.
#[allow(clippy::missing_errors_doc, clippy::cast_sign_loss)]
pub fn query_with_growth<F>(initial_len: usize, mut query: F) -> Result<Vec<u8>, PrylockError>
where
    F: FnMut(&mut [u8]) -> QueryStatus,
{
    let mut buf = vec![0u8; initial_len.max(16)];
    loop {
        match query(buf.as_mut_slice()) {
            QueryStatus::Done { written } => {
                buf.truncate(written.min(buf.len()));
                return Ok(buf);
            }
            QueryStatus::TooSmall { required } => {
                let next = match required {
                    Some(required) if required > buf.len() => required,
                    _ => buf.len().saturating_mul(2),
                };
                buf.resize(next, 0);
            }
            QueryStatus::Failed { status } => {
                return Err(PrylockError::OsQuery {
                    status: status as u32,
                });
            }
        }
    }
}
