//! SQLite persistence for enrolled encodings and attendance records.
//!
//! Encodings are stored as little-endian `f32` blobs. `save` rewrites the
//! employee tables inside one transaction, so a failure leaves the previous
//! state on disk. Punches read the latest record and insert the next one
//! inside a single `IMMEDIATE` transaction.

use chrono::NaiveDateTime;
use facetrack_core::{
    AttendanceKind, AttendanceLog, AttendanceRecord, EmployeeDetails, EmployeeRecord,
    EncodingRegistry, EncodingStore, Encoding, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS employees (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        department  TEXT,
        position    TEXT,
        ordinal     INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS encodings (
        employee_id TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
        seq         INTEGER NOT NULL,
        vector      BLOB NOT NULL,
        PRIMARY KEY (employee_id, seq)
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id           TEXT PRIMARY KEY,
        employee_id  TEXT NOT NULL,
        name         TEXT NOT NULL,
        kind         TEXT NOT NULL,
        recorded_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS attendance_by_employee
        ON attendance (employee_id, recorded_at);
";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file, creating its parent directory.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "database opened");
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EncodingStore for Database {
    fn load_all(&self) -> Result<EncodingRegistry, StoreError> {
        let conn = self.conn();

        let mut stmt = conn
            .prepare("SELECT id, name, department, position FROM employees ORDER BY ordinal")
            .map_err(backend)?;
        let employees = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    EmployeeDetails {
                        department: row.get(2)?,
                        position: row.get(3)?,
                    },
                ))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        let mut stmt = conn
            .prepare("SELECT vector FROM encodings WHERE employee_id = ?1 ORDER BY seq")
            .map_err(backend)?;

        let mut records = Vec::with_capacity(employees.len());
        for (id, name, details) in employees {
            let blobs = stmt
                .query_map([&id], |row| row.get::<_, Vec<u8>>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            let encodings = blobs
                .iter()
                .map(|blob| decode_vector(blob).map(Encoding::new))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Corrupt(format!("employee {id}: {e}")))?;
            records.push((
                id,
                EmployeeRecord {
                    name,
                    details,
                    encodings,
                },
            ));
        }

        Ok(EncodingRegistry::from_records(records))
    }

    fn save(&self, registry: &EncodingRegistry) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;

        tx.execute("DELETE FROM encodings", []).map_err(backend)?;
        tx.execute("DELETE FROM employees", []).map_err(backend)?;
        {
            let mut insert_employee = tx
                .prepare(
                    "INSERT INTO employees (id, name, department, position, ordinal)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(backend)?;
            let mut insert_encoding = tx
                .prepare("INSERT INTO encodings (employee_id, seq, vector) VALUES (?1, ?2, ?3)")
                .map_err(backend)?;

            for (ordinal, (id, record)) in registry.iter().enumerate() {
                insert_employee
                    .execute(params![
                        id,
                        record.name,
                        record.details.department,
                        record.details.position,
                        ordinal as i64
                    ])
                    .map_err(backend)?;
                for (seq, encoding) in record.encodings.iter().enumerate() {
                    insert_encoding
                        .execute(params![id, seq as i64, encode_vector(&encoding.values)])
                        .map_err(backend)?;
                }
            }
        }
        tx.commit().map_err(backend)?;

        tracing::debug!(
            employees = registry.len(),
            samples = registry.total_samples(),
            "registry saved"
        );
        Ok(())
    }
}

impl AttendanceLog for Database {
    fn record(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        insert_attendance(&self.conn(), record)
    }

    fn last_for(&self, employee_id: &str) -> Result<Option<AttendanceRecord>, StoreError> {
        latest_attendance(&self.conn(), employee_id)
    }

    fn append_after<F, E>(&self, employee_id: &str, decide: F) -> Result<AttendanceRecord, E>
    where
        F: FnOnce(Option<&AttendanceRecord>) -> Result<AttendanceRecord, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        let last = latest_attendance(&tx, employee_id)?;
        // Dropping `tx` on an early return rolls it back.
        let record = decide(last.as_ref())?;
        insert_attendance(&tx, &record)?;
        tx.commit().map_err(backend)?;
        Ok(record)
    }

    fn list(
        &self,
        employee_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn
            .prepare(
                "SELECT id, employee_id, name, kind, recorded_at FROM attendance
                 WHERE ?1 IS NULL OR employee_id = ?1
                 ORDER BY recorded_at DESC, rowid DESC LIMIT ?2",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![employee_id, limit], raw_attendance)
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        rows.into_iter().map(parse_attendance).collect()
    }
}

fn insert_attendance(conn: &Connection, record: &AttendanceRecord) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO attendance (id, employee_id, name, kind, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id.to_string(),
            record.employee_id,
            record.name,
            record.kind.as_str(),
            record.recorded_at.format(TIMESTAMP_FORMAT).to_string(),
        ],
    )
    .map_err(backend)?;
    Ok(())
}

fn latest_attendance(
    conn: &Connection,
    employee_id: &str,
) -> Result<Option<AttendanceRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT id, employee_id, name, kind, recorded_at FROM attendance
             WHERE employee_id = ?1 ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
            [employee_id],
            raw_attendance,
        )
        .optional()
        .map_err(backend)?;
    row.map(parse_attendance).transpose()
}

type RawAttendance = (String, String, String, String, String);

fn raw_attendance(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAttendance> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn parse_attendance(raw: RawAttendance) -> Result<AttendanceRecord, StoreError> {
    let (id, employee_id, name, kind, recorded_at) = raw;
    Ok(AttendanceRecord {
        id: id
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("attendance id {id:?}: {e}")))?,
        employee_id,
        name,
        kind: kind
            .parse::<AttendanceKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        recorded_at: NaiveDateTime::parse_from_str(&recorded_at, TIMESTAMP_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("timestamp {recorded_at:?}: {e}")))?,
    })
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, String> {
    if blob.len() % 4 != 0 {
        return Err(format!("vector blob of {} bytes is not a multiple of 4", blob.len()));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use facetrack_core::{punch, PunchError, PunchPolicy};
    use std::sync::{Arc, Barrier};

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_vector_blob_roundtrip() {
        let values = vec![0.0, -1.5, f32::MIN_POSITIVE, 3.25];
        assert_eq!(decode_vector(&encode_vector(&values)).unwrap(), values);
        assert!(decode_vector(&[0, 1, 2]).is_err());
    }

    #[test]
    fn test_empty_database_loads_empty_registry() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_preserves_order_and_vectors() {
        let db = Database::open_in_memory().unwrap();
        let mut reg = EncodingRegistry::new();
        reg.enroll("z", "Zed", vec![enc(&[0.1, 0.2]), enc(&[0.3, 0.4])]).unwrap();
        reg.enroll("a", "Ann", vec![enc(&[0.5, 0.6])]).unwrap();
        db.save(&reg).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded, reg);
        let ids: Vec<&str> = loaded.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["z", "a"]);
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let db = Database::open_in_memory().unwrap();
        let mut reg = EncodingRegistry::new();
        reg.enroll("1", "One", vec![enc(&[1.0])]).unwrap();
        reg.enroll("2", "Two", vec![enc(&[2.0])]).unwrap();
        db.save(&reg).unwrap();

        reg.remove("1");
        db.save(&reg).unwrap();
        let loaded = db.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("2"));
    }

    #[test]
    fn test_corrupt_vector_is_reported() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn();
            conn.execute("INSERT INTO employees (id, name, ordinal) VALUES ('1', 'One', 0)", [])
                .unwrap();
            conn.execute(
                "INSERT INTO encodings (employee_id, seq, vector) VALUES ('1', 0, x'000102')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(db.load_all(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/facetrack.db");
        {
            let db = Database::open(&path).unwrap();
            let mut reg = EncodingRegistry::new();
            reg.enroll("1", "One", vec![enc(&[0.25, 0.5])]).unwrap();
            db.save(&reg).unwrap();
            db.record(&AttendanceRecord::new("1", "One", AttendanceKind::In, at(9, 0)))
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.load_all().unwrap().get("1").unwrap().encodings[0], enc(&[0.25, 0.5]));
        assert_eq!(db.list(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_attendance_last_and_list() {
        let db = Database::open_in_memory().unwrap();
        let first = AttendanceRecord::new("1", "One", AttendanceKind::In, at(9, 0));
        let second = AttendanceRecord::new("2", "Two", AttendanceKind::In, at(9, 5));
        let third = AttendanceRecord::new("1", "One", AttendanceKind::Out, at(17, 0));
        for r in [&first, &second, &third] {
            db.record(r).unwrap();
        }

        assert_eq!(db.last_for("1").unwrap(), Some(third.clone()));
        assert_eq!(db.last_for("3").unwrap(), None);

        let all = db.list(None, 10).unwrap();
        assert_eq!(all, vec![third.clone(), second.clone(), first.clone()]);

        let only_one = db.list(Some("1"), 10).unwrap();
        assert_eq!(only_one, vec![third.clone(), first]);

        assert_eq!(db.list(None, 1).unwrap(), vec![third]);
    }

    #[test]
    fn test_details_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let mut reg = EncodingRegistry::new();
        reg.enroll_with_details("1", "Ada", &EmployeeDetails::new("Research", ""), vec![enc(&[1.0])])
            .unwrap();
        reg.enroll("2", "Bob", vec![enc(&[2.0])]).unwrap();
        db.save(&reg).unwrap();

        let loaded = db.load_all().unwrap();
        assert_eq!(loaded, reg);
        assert_eq!(loaded.get("1").unwrap().details.department.as_deref(), Some("Research"));
        assert!(loaded.get("2").unwrap().details.is_empty());
    }

    #[test]
    fn test_punch_through_database() {
        let db = Database::open_in_memory().unwrap();
        let policy = PunchPolicy::new(60);
        let a = punch(&db, &policy, "1", "One", None, at(9, 0)).unwrap();
        let b = punch(&db, &policy, "1", "One", None, at(12, 0)).unwrap();
        assert_eq!(a.kind, AttendanceKind::In);
        assert_eq!(b.kind, AttendanceKind::Out);
    }

    #[test]
    fn test_refused_punch_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let policy = PunchPolicy::new(3600);
        punch(&db, &policy, "1", "One", None, at(9, 0)).unwrap();
        let err = punch(&db, &policy, "1", "One", None, at(9, 30)).unwrap_err();
        assert!(matches!(err, PunchError::TooSoon { .. }));
        assert_eq!(db.list(Some("1"), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_punches_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("facetrack.db")).unwrap());
        let policy = PunchPolicy::new(60);
        let start = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    punch(&*db, &policy, "7", "Ada", None, at(9, 0)).is_ok()
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        assert_eq!(successes, 1);
        assert_eq!(db.list(Some("7"), 10).unwrap().len(), 1);
    }
}
