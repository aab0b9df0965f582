//! Owned, lock-guarded registry shared between request handlers.
//!
//! Readers take an `Arc` snapshot and never wait on persistence. Writers are
//! serialized by one mutex, build the next registry on a copy, persist it and
//! only then publish it. A failed save leaves the published registry as it was.

use crate::registry::{EncodingRegistry, RegistryError};
use crate::store::{EncodingStore, StoreError};
use crate::types::{EmployeeDetails, EmployeeRecord, Encoding};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("invalid enrollment: {0}")]
    Registry(#[from] RegistryError),
    #[error("employee not found: {0}")]
    NotFound(String),
    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollOutcome {
    pub samples_added: usize,
    pub total_samples: usize,
}

pub struct SharedRegistry<S> {
    store: S,
    current: RwLock<Arc<EncodingRegistry>>,
    write_lock: Mutex<()>,
}

impl<S: EncodingStore> SharedRegistry<S> {
    /// Load the registry from `store` once.
    pub fn load(store: S) -> Result<Self, StoreError> {
        let registry = store.load_all()?;
        tracing::info!(
            employees = registry.len(),
            samples = registry.total_samples(),
            "registry loaded"
        );
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(registry)),
            write_lock: Mutex::new(()),
        })
    }

    /// Current published registry.
    pub fn snapshot(&self) -> Arc<EncodingRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn enroll(
        &self,
        employee_id: &str,
        name: &str,
        samples: Vec<Encoding>,
    ) -> Result<EnrollOutcome, UpdateError> {
        self.enroll_with_details(employee_id, name, &EmployeeDetails::default(), samples)
    }

    pub fn enroll_with_details(
        &self,
        employee_id: &str,
        name: &str,
        details: &EmployeeDetails,
        samples: Vec<Encoding>,
    ) -> Result<EnrollOutcome, UpdateError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let samples_added = samples.len();
        let mut next = (*self.snapshot()).clone();
        let total_samples = next.enroll_with_details(employee_id, name, details, samples)?;

        self.store.save(&next)?;
        self.publish(next);

        tracing::info!(
            employee = employee_id,
            samples_added,
            total_samples,
            "employee enrolled"
        );
        Ok(EnrollOutcome {
            samples_added,
            total_samples,
        })
    }

    pub fn remove(&self, employee_id: &str) -> Result<EmployeeRecord, UpdateError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.snapshot()).clone();
        let removed = next
            .remove(employee_id)
            .ok_or_else(|| UpdateError::NotFound(employee_id.trim().to_string()))?;

        self.store.save(&next)?;
        self.publish(next);

        tracing::info!(employee = employee_id, "employee removed");
        Ok(removed)
    }

    fn publish(&self, next: EncodingRegistry) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}
