//! In-memory encoding registry.
//!
//! Employees are kept in first-enrollment order. The matcher relies on that
//! order to break confidence ties, and the SQLite store persists it.
//!
//! IDs are trimmed on every entry point, so `" 7 "` and `"7"` name the same
//! employee.

use crate::types::{
    EmployeeDetails, EmployeeId, EmployeeRecord, EmployeeSummary, Encoding, RegistryStats,
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("employee id must not be empty")]
    EmptyId,
    #[error("employee name must not be empty")]
    EmptyName,
    #[error("no face samples supplied")]
    NoSamples,
    #[error("sample {index} is empty or contains non-finite values")]
    InvalidSample { index: usize },
    #[error("sample {index} has dimension {actual}, registry uses {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Mapping from employee ID to enrolled samples, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingRegistry {
    entries: Vec<(EmployeeId, EmployeeRecord)>,
}

impl EncodingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-persisted records without validation.
    ///
    /// Later duplicates of an ID are merged into the first occurrence.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (EmployeeId, EmployeeRecord)>,
    {
        let mut registry = Self::new();
        for (id, record) in records {
            match registry.position(&id) {
                Some(pos) => {
                    let existing = &mut registry.entries[pos].1;
                    existing.name = record.name;
                    existing.details.merge(&record.details);
                    existing.encodings.extend(record.encodings);
                }
                None => registry.entries.push((id, record)),
            }
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&EmployeeRecord> {
        self.position(id).map(|pos| &self.entries[pos].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EmployeeRecord)> {
        self.entries.iter().map(|(id, record)| (id.as_str(), record))
    }

    /// Dimensionality of the first stored sample, if any sample exists.
    pub fn dimension(&self) -> Option<usize> {
        self.entries
            .iter()
            .flat_map(|(_, record)| record.encodings.iter())
            .map(Encoding::dim)
            .find(|&d| d > 0)
    }

    pub fn total_samples(&self) -> usize {
        self.entries.iter().map(|(_, r)| r.encodings.len()).sum()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_employees: self.len(),
            total_samples: self.total_samples(),
        }
    }

    pub fn summaries(&self) -> Vec<EmployeeSummary> {
        self.entries
            .iter()
            .map(|(id, record)| EmployeeSummary {
                id: id.clone(),
                name: record.name.clone(),
                details: record.details.clone(),
                samples: record.encodings.len(),
            })
            .collect()
    }

    /// Add face samples for an employee, creating the record on first enrollment.
    ///
    /// Re-enrollment appends samples and replaces the stored name. Nothing is
    /// modified if any sample is rejected. Returns the employee's sample count.
    pub fn enroll(
        &mut self,
        id: &str,
        name: &str,
        samples: Vec<Encoding>,
    ) -> Result<usize, RegistryError> {
        self.enroll_with_details(id, name, &EmployeeDetails::default(), samples)
    }

    /// Like [`enroll`](Self::enroll), also updating the employee's details.
    ///
    /// Detail fields left unset in `details` keep their stored value.
    pub fn enroll_with_details(
        &mut self,
        id: &str,
        name: &str,
        details: &EmployeeDetails,
        samples: Vec<Encoding>,
    ) -> Result<usize, RegistryError> {
        let id = id.trim();
        let name = name.trim();
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if samples.is_empty() {
            return Err(RegistryError::NoSamples);
        }

        let mut expected = self.dimension();
        for (index, sample) in samples.iter().enumerate() {
            if sample.is_empty() || !sample.is_finite() {
                return Err(RegistryError::InvalidSample { index });
            }
            match expected {
                Some(d) if d != sample.dim() => {
                    return Err(RegistryError::DimensionMismatch {
                        index,
                        expected: d,
                        actual: sample.dim(),
                    });
                }
                Some(_) => {}
                None => expected = Some(sample.dim()),
            }
        }

        let count = match self.position(id) {
            Some(pos) => {
                let record = &mut self.entries[pos].1;
                record.name = name.to_string();
                record.details.merge(details);
                record.encodings.extend(samples);
                record.encodings.len()
            }
            None => {
                let count = samples.len();
                self.entries.push((
                    id.to_string(),
                    EmployeeRecord {
                        name: name.to_string(),
                        details: details.clone(),
                        encodings: samples,
                    },
                ));
                count
            }
        };
        Ok(count)
    }

    /// Remove an employee, preserving the order of the remaining ones.
    pub fn remove(&mut self, id: &str) -> Option<EmployeeRecord> {
        let pos = self.position(id)?;
        Some(self.entries.remove(pos).1)
    }

    fn position(&self, id: &str) -> Option<usize> {
        let id = id.trim();
        self.entries.iter().position(|(k, _)| k == id)
    }
}
