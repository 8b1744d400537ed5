use std::ffi::c_void;
use std::mem;
use std::ptr;

use windows_sys::Win32::Foundation::{
    CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, GetLastError, HANDLE,
};
use windows_sys::Win32::Storage::FileSystem::GetFileSizeEx;
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_READ, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, PAGE_READONLY,
    UnmapViewOfFile,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

use crate::config::PrylockConfig;
use crate::error::PrylockError;
use crate::kernel::{HandleRecord, Kernel, QueryStatus, RawHandle, query_with_growth};

const SYSTEM_HANDLE_INFORMATION_CLASS: u32 = 16;
const OBJECT_NAME_INFORMATION_CLASS: u32 = 1;

const STATUS_SUCCESS: i32 = 0;
const STATUS_BUFFER_OVERFLOW: i32 = 0x8000_0005_u32 as i32;
const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004_u32 as i32;
const STATUS_BUFFER_TOO_SMALL: i32 = 0xC000_0023_u32 as i32;

#[allow(unsafe_code)]
#[link(name = "ntdll")]
unsafe extern "system" {
    fn NtQuerySystemInformation(
        system_information_class: u32,
        system_information: *mut c_void,
        system_information_length: u32,
        return_length: *mut u32,
    ) -> i32;

    fn NtQueryObject(
        handle: HANDLE,
        object_information_class: u32,
        object_information: *mut c_void,
        object_information_length: u32,
        return_length: *mut u32,
    ) -> i32;
}

#[repr(C)]
#[allow(dead_code)]
struct SystemHandleEntry {
    process_id: u32,
    object_type_number: u8,
    flags: u8,
    handle_value: u16,
    object_pointer: *mut c_void,
    granted_access: u32,
}

#[repr(C)]
struct SystemHandleHeader {
    number_of_handles: usize,
}

#[repr(C)]
#[allow(dead_code)]
struct UnicodeString {
    length: u16,
    maximum_length: u16,
    buffer: *mut u16,
}

#[allow(unsafe_code)]
fn parse_handle_snapshot(buf: &[u8]) -> Vec<HandleRecord> {
    let header_len = mem::size_of::<SystemHandleHeader>();
    let entry_len = mem::size_of::<SystemHandleEntry>();
    if buf.len() < header_len {
        return Vec::new();
    }

    let header = unsafe { ptr::read_unaligned(buf.as_ptr().cast::<SystemHandleHeader>()) };
    let fits = (buf.len() - header_len) / entry_len;
    let count = header.number_of_handles.min(fits);

    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let offset = header_len + i * entry_len;
        let entry = unsafe {
            ptr::read_unaligned(buf.as_ptr().add(offset).cast::<SystemHandleEntry>())
        };
        records.push(HandleRecord {
            owner_pid: entry.process_id,
            handle_value: usize::from(entry.handle_value),
            object_type_index: u16::from(entry.object_type_number),
            granted_access: entry.granted_access,
        });
    }
    records
}

#[allow(unsafe_code)]
fn unicode_string_to_string(info: &[u8]) -> String {
    if info.len() < mem::size_of::<UnicodeString>() {
        return String::new();
    }
    let name = unsafe { ptr::read_unaligned(info.as_ptr().cast::<UnicodeString>()) };
    if name.buffer.is_null() || name.length == 0 {
        return String::new();
    }
    let words = usize::from(name.length) / 2;
    let data = unsafe { std::slice::from_raw_parts(name.buffer.cast_const(), words) };
    String::from_utf16_lossy(data)
}

/// The real system handle table, reached through `ntdll` and the Win32
/// mapping primitives.
pub struct NtKernel {
    initial_snapshot_bytes: usize,
    name_buffer_bytes: usize,
}

impl NtKernel {
    #[must_use]
    pub fn new(config: &PrylockConfig) -> Self {
        Self {
            initial_snapshot_bytes: config.scan.initial_buffer_bytes,
            name_buffer_bytes: config.resolve.name_buffer_bytes,
        }
    }
}

impl Default for NtKernel {
    fn default() -> Self {
        Self::new(&PrylockConfig::default())
    }
}

impl Kernel for NtKernel {
    #[allow(unsafe_code)]
    fn handle_snapshot(&self) -> Result<Vec<HandleRecord>, PrylockError> {
        let buf = query_with_growth(self.initial_snapshot_bytes, |buf| {
            let mut ret_len: u32 = 0;
            let status = unsafe {
                NtQuerySystemInformation(
                    SYSTEM_HANDLE_INFORMATION_CLASS,
                    buf.as_mut_ptr().cast(),
                    u32::try_from(buf.len()).unwrap_or(u32::MAX),
                    ptr::from_mut(&mut ret_len),
                )
            };
            match status {
                STATUS_SUCCESS => QueryStatus::Done {
                    written: ret_len as usize,
                },
                STATUS_INFO_LENGTH_MISMATCH | STATUS_BUFFER_OVERFLOW | STATUS_BUFFER_TOO_SMALL => {
                    QueryStatus::TooSmall {
                        required: (ret_len > 0).then_some(ret_len as usize),
                    }
                }
                other => QueryStatus::Failed { status: other },
            }
        })?;
        Ok(parse_handle_snapshot(buf.as_slice()))
    }

    #[allow(unsafe_code)]
    fn open_process_for_duplication(&self, pid: u32) -> Result<RawHandle, PrylockError> {
        let process = unsafe { OpenProcess(PROCESS_DUP_HANDLE, 0, pid) };
        if process == 0 {
            return Err(PrylockError::AccessDenied {
                pid,
                os_error: unsafe { GetLastError() },
            });
        }
        Ok(process)
    }

    #[allow(unsafe_code, clippy::cast_possible_wrap)]
    fn duplicate_to_current(
        &self,
        owner_process: RawHandle,
        handle_value: usize,
    ) -> Result<RawHandle, PrylockError> {
        let mut duplicated: HANDLE = 0;
        let ok = unsafe {
            DuplicateHandle(
                owner_process,
                handle_value as HANDLE,
                GetCurrentProcess(),
                ptr::from_mut(&mut duplicated),
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        if ok == 0 {
            return Err(PrylockError::DuplicationFailed {
                handle_value,
                os_error: unsafe { GetLastError() },
            });
        }
        Ok(duplicated)
    }

    #[allow(unsafe_code)]
    fn object_name(&self, handle: RawHandle) -> Result<String, PrylockError> {
        // A name query against a pipe with a pending synchronous operation
        // can stall. Probing the handle with a one-byte read-only mapping
        // rejects everything that is not a mappable file before the query.
        let probe =
            unsafe { CreateFileMappingW(handle, ptr::null(), PAGE_READONLY, 0, 1, ptr::null()) };
        if probe == 0 {
            return Err(PrylockError::ResolutionFailed);
        }
        unsafe {
            CloseHandle(probe);
        }

        // Fixed-size query: a name that does not fit is "no match", never a
        // reason to grow and retry.
        let mut buf = vec![0u8; self.name_buffer_bytes];
        let mut ret_len: u32 = 0;
        let status = unsafe {
            NtQueryObject(
                handle,
                OBJECT_NAME_INFORMATION_CLASS,
                buf.as_mut_ptr().cast(),
                u32::try_from(buf.len()).unwrap_or(u32::MAX),
                ptr::from_mut(&mut ret_len),
            )
        };
        if status != STATUS_SUCCESS {
            return Err(PrylockError::ResolutionFailed);
        }
        Ok(unicode_string_to_string(buf.as_slice()))
    }

    #[allow(unsafe_code)]
    fn file_size(&self, file: RawHandle) -> Result<u64, PrylockError> {
        let mut size: i64 = 0;
        let ok = unsafe { GetFileSizeEx(file, ptr::from_mut(&mut size)) };
        if ok == 0 {
            return Err(PrylockError::MapFailed {
                stage: "file_size",
                os_error: unsafe { GetLastError() },
            });
        }
        Ok(u64::try_from(size).unwrap_or(0))
    }

    #[allow(unsafe_code)]
    fn create_readonly_mapping(&self, file: RawHandle) -> Result<RawHandle, PrylockError> {
        let mapping =
            unsafe { CreateFileMappingW(file, ptr::null(), PAGE_READONLY, 0, 0, ptr::null()) };
        if mapping == 0 {
            return Err(PrylockError::MapFailed {
                stage: "create_mapping",
                os_error: unsafe { GetLastError() },
            });
        }
        Ok(mapping)
    }

    #[allow(unsafe_code)]
    fn map_readonly_view(&self, mapping: RawHandle) -> Result<*const u8, PrylockError> {
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0) };
        if view.Value.is_null() {
            return Err(PrylockError::MapFailed {
                stage: "map_view",
                os_error: unsafe { GetLastError() },
            });
        }
        Ok(view.Value.cast_const().cast::<u8>())
    }

    #[allow(unsafe_code)]
    fn unmap_view(&self, view: *const u8) {
        let address = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: view.cast_mut().cast::<c_void>(),
        };
        unsafe {
            UnmapViewOfFile(address);
        }
    }

    #[allow(unsafe_code)]
    fn close_handle(&self, handle: RawHandle) {
        unsafe {
            CloseHandle(handle);
        }
    }
}
