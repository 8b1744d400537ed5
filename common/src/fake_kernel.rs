//! Deterministic kernel shim for the locator and copier tests: a synthetic
//! handle table with per-candidate failure injection and full open/close
//! accounting. Real system-wide handle contention cannot be reproduced in a
//! test, so the orchestration logic is exercised against this instead.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::PrylockError;
use crate::kernel::{HandleRecord, Kernel, RawHandle};

pub struct FakeObject {
    name: Option<String>,
    bytes: Vec<u8>,
    reported_size: Option<u64>,
    duplicable: bool,
    mappable: bool,
}

impl FakeObject {
    pub fn file(name: &str, bytes: &[u8]) -> Self {
        Self {
            name: Some(name.to_string()),
            bytes: bytes.to_vec(),
            reported_size: None,
            duplicable: true,
            mappable: true,
        }
    }

    /// Name resolution fails outright for this object.
    pub fn unresolvable(mut self) -> Self {
        self.name = None;
        self
    }

    /// Name resolution succeeds but yields an empty string.
    pub fn with_empty_name(mut self) -> Self {
        self.name = Some(String::new());
        self
    }

    /// Duplication fails, as for a handle closed after the snapshot.
    pub fn not_duplicable(mut self) -> Self {
        self.duplicable = false;
        self
    }

    pub fn not_mappable(mut self) -> Self {
        self.mappable = false;
        self
    }

    /// Overrides the size reported from the handle, independent of the
    /// stored bytes (page-rounded mappings, truncation races).
    pub fn with_reported_size(mut self, size: u64) -> Self {
        self.reported_size = Some(size);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Live {
    Process(u32),
    Object(u32, usize),
    Mapping(u32, usize),
}

#[derive(Default)]
struct State {
    next: RawHandle,
    live: HashMap<RawHandle, Live>,
    views: HashMap<usize, (u32, usize)>,
    opened_processes: usize,
    duplicated: usize,
    mappings_created: usize,
    views_unmapped: usize,
    closed: usize,
    events: Vec<&'static str>,
}

#[derive(Default)]
pub struct FakeKernel {
    processes: HashMap<u32, bool>,
    objects: HashMap<(u32, usize), FakeObject>,
    records: Vec<HandleRecord>,
    snapshot_failure: Option<u32>,
    state: RefCell<State>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&mut self, pid: u32) {
        self.processes.insert(pid, true);
    }

    /// The process exists in records but cannot be opened (exited or
    /// protected).
    pub fn add_unopenable_process(&mut self, pid: u32) {
        self.processes.insert(pid, false);
    }

    pub fn add_handle(
        &mut self,
        pid: u32,
        handle_value: usize,
        object_type_index: u16,
        object: FakeObject,
    ) {
        self.records.push(HandleRecord {
            owner_pid: pid,
            handle_value,
            object_type_index,
            granted_access: 0x0012_0089,
        });
        self.objects.insert((pid, handle_value), object);
    }

    /// A record with no backing object: the handle closed between the
    /// snapshot and the duplication attempt.
    pub fn add_stale_record(&mut self, pid: u32, handle_value: usize, object_type_index: u16) {
        self.records.push(HandleRecord {
            owner_pid: pid,
            handle_value,
            object_type_index,
            granted_access: 0x0012_0089,
        });
    }

    pub fn fail_snapshot(&mut self, status: u32) {
        self.snapshot_failure = Some(status);
    }

    fn alloc(&self, entry: Live) -> RawHandle {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        let raw = 1000 + state.next;
        state.live.insert(raw, entry);
        match entry {
            Live::Process(_) => state.opened_processes += 1,
            Live::Object(_, _) => state.duplicated += 1,
            Live::Mapping(_, _) => state.mappings_created += 1,
        }
        raw
    }

    fn live_entry(&self, raw: RawHandle) -> Live {
        *self
            .state
            .borrow()
            .live
            .get(&raw)
            .unwrap_or_else(|| panic!("use of a handle that is not open: {raw}"))
    }

    pub fn live_handles(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.borrow().views.len()
    }

    pub fn opened_processes(&self) -> usize {
        self.state.borrow().opened_processes
    }

    pub fn duplicated(&self) -> usize {
        self.state.borrow().duplicated
    }

    pub fn mappings_created(&self) -> usize {
        self.state.borrow().mappings_created
    }

    pub fn views_unmapped(&self) -> usize {
        self.state.borrow().views_unmapped
    }

    pub fn closed(&self) -> usize {
        self.state.borrow().closed
    }

    /// Release-order trace: `"unmap"`, `"close:mapping"`, `"close:object"`,
    /// `"close:process"` in the order they happened.
    pub fn release_events(&self) -> Vec<&'static str> {
        self.state.borrow().events.clone()
    }
}

impl Kernel for FakeKernel {
    fn handle_snapshot(&self) -> Result<Vec<HandleRecord>, PrylockError> {
        if let Some(status) = self.snapshot_failure {
            return Err(PrylockError::OsQuery { status });
        }
        Ok(self.records.clone())
    }

    fn open_process_for_duplication(&self, pid: u32) -> Result<RawHandle, PrylockError> {
        match self.processes.get(&pid) {
            Some(true) => Ok(self.alloc(Live::Process(pid))),
            _ => Err(PrylockError::AccessDenied { pid, os_error: 5 }),
        }
    }

    fn duplicate_to_current(
        &self,
        owner_process: RawHandle,
        handle_value: usize,
    ) -> Result<RawHandle, PrylockError> {
        let Live::Process(pid) = self.live_entry(owner_process) else {
            panic!("duplicate_to_current from a non-process handle");
        };
        match self.objects.get(&(pid, handle_value)) {
            Some(object) if object.duplicable => Ok(self.alloc(Live::Object(pid, handle_value))),
            _ => Err(PrylockError::DuplicationFailed {
                handle_value,
                os_error: 6,
            }),
        }
    }

    fn object_name(&self, handle: RawHandle) -> Result<String, PrylockError> {
        let Live::Object(pid, value) = self.live_entry(handle) else {
            panic!("object_name on a non-object handle");
        };
        match &self.objects[&(pid, value)].name {
            Some(name) => Ok(name.clone()),
            None => Err(PrylockError::ResolutionFailed),
        }
    }

    fn file_size(&self, file: RawHandle) -> Result<u64, PrylockError> {
        let Live::Object(pid, value) = self.live_entry(file) else {
            panic!("file_size on a non-object handle");
        };
        let object = &self.objects[&(pid, value)];
        Ok(object
            .reported_size
            .unwrap_or(object.bytes.len() as u64))
    }

    fn create_readonly_mapping(&self, file: RawHandle) -> Result<RawHandle, PrylockError> {
        let Live::Object(pid, value) = self.live_entry(file) else {
            panic!("create_readonly_mapping on a non-object handle");
        };
        if self.objects[&(pid, value)].mappable {
            Ok(self.alloc(Live::Mapping(pid, value)))
        } else {
            Err(PrylockError::MapFailed {
                stage: "create_mapping",
                os_error: 2,
            })
        }
    }

    fn map_readonly_view(&self, mapping: RawHandle) -> Result<*const u8, PrylockError> {
        let Live::Mapping(pid, value) = self.live_entry(mapping) else {
            panic!("map_readonly_view on a non-mapping handle");
        };
        let ptr = self.objects[&(pid, value)].bytes.as_ptr();
        self.state
            .borrow_mut()
            .views
            .insert(ptr as usize, (pid, value));
        Ok(ptr)
    }

    fn unmap_view(&self, view: *const u8) {
        let mut state = self.state.borrow_mut();
        assert!(
            state.views.remove(&(view as usize)).is_some(),
            "unmap of a view that is not mapped"
        );
        state.views_unmapped += 1;
        state.events.push("unmap");
    }

    fn close_handle(&self, handle: RawHandle) {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.live.remove(&handle) else {
            panic!("close of a handle that is not open: {handle}");
        };
        state.closed += 1;
        state.events.push(match entry {
            Live::Process(_) => "close:process",
            Live::Object(_, _) => "close:object",
            Live::Mapping(_, _) => "close:mapping",
        });
    }
}
