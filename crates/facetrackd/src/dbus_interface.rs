use crate::engine::{EngineError, EngineHandle};
use crate::store::Database;
use chrono::{Local, NaiveDateTime, Timelike};
use facetrack_core::{
    punch, AttendanceKind, AttendanceLog, AttendanceRecord, EmployeeDetails, Encoding,
    EncodingRegistry, ExtractError, MatchResult, PunchError, PunchPolicy, Recognition,
    SharedRegistry, StoreError, UpdateError,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.facetrack.FaceTrack1";
pub const OBJECT_PATH: &str = "/org/facetrack/FaceTrack1";

const DEFAULT_ATTENDANCE_LIMIT: usize = 100;

/// D-Bus interface for the FaceTrack attendance daemon.
///
/// Bus name: org.facetrack.FaceTrack1
/// Object path: /org/facetrack/FaceTrack1
pub struct FaceTrackService {
    pub registry: Arc<SharedRegistry<Arc<Database>>>,
    pub db: Arc<Database>,
    pub engine: EngineHandle,
    pub threshold: f32,
    pub punch_policy: PunchPolicy,
    pub model_path: PathBuf,
    pub detector_path: PathBuf,
}

impl FaceTrackService {
    /// Extract every image; undecodable or faceless images are skipped.
    async fn extract_samples(&self, images: Vec<Vec<u8>>) -> fdo::Result<Vec<Encoding>> {
        let total = images.len();
        let mut samples = Vec::with_capacity(total);
        for (index, image) in images.into_iter().enumerate() {
            match self.engine.extract(image).await {
                Ok(Some(encoding)) => samples.push(encoding),
                Ok(None) => tracing::debug!(index, "enroll: no face in sample"),
                Err(EngineError::Extract(ExtractError::InvalidImage(e))) => {
                    tracing::debug!(index, error = %e, "enroll: undecodable sample")
                }
                Err(e) => return Err(engine_error(e)),
            }
        }
        tracing::debug!(total, valid = samples.len(), "enroll: samples extracted");
        Ok(samples)
    }

    /// Recognize against the current snapshot, returned alongside the result.
    async fn run_recognition(
        &self,
        image: Vec<u8>,
    ) -> fdo::Result<(Recognition, Arc<EncodingRegistry>)> {
        let snapshot = self.registry.snapshot();
        let recognition = self
            .engine
            .recognize(snapshot.clone(), self.threshold, image)
            .await
            .map_err(engine_error)?;
        Ok((recognition, snapshot))
    }

    async fn punch_now(
        &self,
        employee_id: &str,
        name: &str,
        requested: Option<AttendanceKind>,
    ) -> fdo::Result<Result<AttendanceRecord, PunchError>> {
        let db = self.db.clone();
        let policy = self.punch_policy;
        let employee_id = employee_id.to_string();
        let name = name.to_string();
        blocking(move || punch(&*db, &policy, &employee_id, &name, requested, now())).await
    }
}

#[interface(name = "org.facetrack.FaceTrack1")]
impl FaceTrackService {
    /// Enroll face samples for an employee. Re-enrolling appends samples.
    ///
    /// Empty `department` or `position` leave the stored value unchanged.
    async fn enroll(
        &self,
        employee_id: &str,
        name: &str,
        department: &str,
        position: &str,
        images: Vec<Vec<u8>>,
    ) -> fdo::Result<String> {
        tracing::info!(employee_id, name, images = images.len(), "enroll requested");
        if images.is_empty() {
            return Err(fdo::Error::InvalidArgs("no face samples supplied".into()));
        }

        let samples = self.extract_samples(images).await?;
        if samples.is_empty() {
            return Err(fdo::Error::InvalidArgs(
                "no valid face encodings could be extracted".into(),
            ));
        }

        let registry = self.registry.clone();
        let details = EmployeeDetails::new(department, position);
        let id = employee_id.trim().to_string();
        let name = name.trim().to_string();
        let outcome = {
            let (id, name) = (id.clone(), name.clone());
            blocking(move || registry.enroll_with_details(&id, &name, &details, samples)).await?
        }
        .map_err(update_error)?;

        Ok(json!({
            "employeeId": id,
            "samplesAdded": outcome.samples_added,
            "totalSamples": outcome.total_samples,
            "message": format!(
                "Successfully enrolled {} face samples for {}",
                outcome.samples_added, name
            ),
        })
        .to_string())
    }

    /// Recognize a face without recording attendance.
    async fn recognize(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "recognize requested");
        let (recognition, snapshot) = self.run_recognition(image).await?;
        Ok(recognition_json(&recognition, &snapshot).to_string())
    }

    /// Recognize a face and, on a match, punch attendance for that employee.
    async fn check_in(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "check_in requested");
        let (recognition, snapshot) = self.run_recognition(image).await?;
        let result = recognition.result();

        let (attendance, message) = match (&result.employee_id, &result.name) {
            (Some(id), Some(name)) if result.matched => {
                match self.punch_now(id, name, None).await? {
                    Ok(record) => {
                        let message = format!("{} punched {}", record.name, record.kind);
                        (Some(record), message)
                    }
                    Err(e @ PunchError::TooSoon { .. }) => {
                        tracing::info!(employee = %id, "check_in inside cooldown");
                        (None, e.to_string())
                    }
                    Err(PunchError::Store(e)) => return Err(store_error(e)),
                }
            }
            _ => (None, recognition.message().to_string()),
        };

        Ok(json!({
            "recognition": recognition_json(&recognition, &snapshot),
            "attendance": attendance,
            "message": message,
        })
        .to_string())
    }

    /// Record attendance manually. An empty `kind` alternates IN/OUT automatically.
    async fn record_attendance(&self, employee_id: &str, kind: &str) -> fdo::Result<String> {
        tracing::info!(employee_id, kind, "record_attendance requested");
        let employee_id = employee_id.trim();
        let requested = match kind.trim() {
            "" => None,
            k => Some(
                k.parse::<AttendanceKind>()
                    .map_err(|e| fdo::Error::InvalidArgs(e.to_string()))?,
            ),
        };

        let name = self
            .registry
            .snapshot()
            .get(employee_id)
            .map(|record| record.name.clone())
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("employee not found: {employee_id}")))?;

        let entry = self
            .punch_now(employee_id, &name, requested)
            .await?
            .map_err(|e| match e {
                PunchError::TooSoon { .. } => fdo::Error::Failed(e.to_string()),
                PunchError::Store(e) => store_error(e),
            })?;
        serde_json::to_string(&entry).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// List attendance records, newest first. Empty `employee_id` lists everyone.
    async fn attendance(&self, employee_id: &str, limit: u32) -> fdo::Result<String> {
        tracing::info!(employee_id, limit, "attendance requested");
        let filter = Some(employee_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let limit = match limit {
            0 => DEFAULT_ATTENDANCE_LIMIT,
            n => n as usize,
        };
        let db = self.db.clone();
        let records = blocking(move || db.list(filter.as_deref(), limit))
            .await?
            .map_err(store_error)?;
        serde_json::to_string(&records).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// List enrolled employees with their details and sample counts.
    async fn list_employees(&self) -> fdo::Result<String> {
        let summaries = self.registry.snapshot().summaries();
        serde_json::to_string(&summaries).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Remove an employee and all of their face samples.
    async fn delete_employee(&self, employee_id: &str) -> fdo::Result<bool> {
        tracing::info!(employee_id, "delete_employee requested");
        let registry = self.registry.clone();
        let id = employee_id.to_string();
        blocking(move || registry.remove(&id))
            .await?
            .map_err(update_error)?;
        Ok(true)
    }

    /// Registry totals.
    async fn stats(&self) -> fdo::Result<String> {
        serde_json::to_string(&self.registry.snapshot().stats())
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> fdo::Result<String> {
        let snapshot = self.registry.snapshot();
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "employees": snapshot.len(),
            "samples": snapshot.total_samples(),
            "dimension": snapshot.dimension(),
            "threshold": self.threshold,
            "model": self.model_path.display().to_string(),
            "detector": self.detector_path.display().to_string(),
        })
        .to_string())
    }
}

/// Run SQLite work on the blocking pool instead of an executor thread.
async fn blocking<T, F>(work: F) -> fdo::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| fdo::Error::Failed(format!("blocking task failed: {e}")))
}

/// Local wall-clock time truncated to whole seconds, matching the stored precision.
fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn recognition_json(recognition: &Recognition, registry: &EncodingRegistry) -> serde_json::Value {
    let MatchResult {
        matched,
        employee_id,
        name,
        confidence,
    } = recognition.result();
    let details = employee_id
        .as_deref()
        .and_then(|id| registry.get(id))
        .map(|record| &record.details)
        .filter(|details| !details.is_empty());
    json!({
        "detected": recognition.detected(),
        "matched": matched,
        "employeeId": employee_id,
        "name": name,
        "details": details,
        "confidence": confidence,
        "message": recognition.message(),
    })
}

fn engine_error(e: EngineError) -> fdo::Error {
    match e {
        EngineError::Extract(ExtractError::InvalidImage(e)) => {
            fdo::Error::InvalidArgs(format!("invalid image data: {e}"))
        }
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn update_error(e: UpdateError) -> fdo::Error {
    match e {
        UpdateError::Registry(_) | UpdateError::NotFound(_) => fdo::Error::InvalidArgs(e.to_string()),
        UpdateError::Store(_) => {
            tracing::error!(error = %e, "registry update failed");
            fdo::Error::Failed(e.to_string())
        }
    }
}

fn store_error(e: StoreError) -> fdo::Error {
    tracing::error!(error = %e, "store operation failed");
    fdo::Error::Failed(e.to_string())
}
