//! Persistence interfaces for enrolled encodings and attendance records.

use crate::attendance::AttendanceRecord;
use crate::registry::EncodingRegistry;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Backing store for the encoding registry.
pub trait EncodingStore {
    /// Load every persisted employee, in enrollment order.
    fn load_all(&self) -> Result<EncodingRegistry, StoreError>;

    /// Replace the persisted state with `registry`. Must be atomic.
    fn save(&self, registry: &EncodingRegistry) -> Result<(), StoreError>;
}

impl<T: EncodingStore + ?Sized> EncodingStore for Arc<T> {
    fn load_all(&self) -> Result<EncodingRegistry, StoreError> {
        (**self).load_all()
    }

    fn save(&self, registry: &EncodingRegistry) -> Result<(), StoreError> {
        (**self).save(registry)
    }
}

/// Append-only attendance logger.
pub trait AttendanceLog {
    fn record(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Most recent record for an employee.
    fn last_for(&self, employee_id: &str) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Read the employee's latest record, let `decide` build the next one and
    /// append it, as one step. No other append for any employee may land
    /// between the read and the write.
    fn append_after<F, E>(&self, employee_id: &str, decide: F) -> Result<AttendanceRecord, E>
    where
        F: FnOnce(Option<&AttendanceRecord>) -> Result<AttendanceRecord, E>,
        E: From<StoreError>;

    /// Records newest first, optionally restricted to one employee.
    fn list(
        &self,
        employee_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
}

impl<T: AttendanceLog + ?Sized> AttendanceLog for Arc<T> {
    fn record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        (**self).record(record)
    }

    fn last_for(&self, employee_id: &str) -> Result<Option<AttendanceRecord>, StoreError> {
        (**self).last_for(employee_id)
    }

    fn append_after<F, E>(&self, employee_id: &str, decide: F) -> Result<AttendanceRecord, E>
    where
        F: FnOnce(Option<&AttendanceRecord>) -> Result<AttendanceRecord, E>,
        E: From<StoreError>,
    {
        (**self).append_after(employee_id, decide)
    }

    fn list(
        &self,
        employee_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        (**self).list(employee_id, limit)
    }
}
