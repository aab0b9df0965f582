use serde::{Deserialize, Serialize};

/// Employee identifier as supplied by the enrolling client.
pub type EmployeeId = String;

/// Face encoding vector (512-dimensional for ArcFace, 128 for dlib-style extractors).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two encodings.
    ///
    /// Only the first `min(len(self), len(other))` components are compared,
    /// so vectors of different dimensionality are truncated rather than rejected.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Local similarity score: `1 - distance`. Equals 1.0 for identical vectors.
    pub fn confidence(&self, other: &Encoding) -> f32 {
        1.0 - self.euclidean_distance(other)
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Optional HR details kept alongside an employee's name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl EmployeeDetails {
    /// Build details from free-form input; blank fields become `None`.
    pub fn new(department: &str, position: &str) -> Self {
        let field = |v: &str| Some(v.trim()).filter(|v| !v.is_empty()).map(str::to_string);
        Self {
            department: field(department),
            position: field(position),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.department.is_none() && self.position.is_none()
    }

    /// Overwrite the fields that `update` sets, keeping the rest.
    pub fn merge(&mut self, update: &EmployeeDetails) {
        if let Some(v) = &update.department {
            self.department = Some(v.clone());
        }
        if let Some(v) = &update.position {
            self.position = Some(v.clone());
        }
    }
}

/// An enrolled employee and every face sample captured for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub name: String,
    #[serde(default)]
    pub details: EmployeeDetails,
    pub encodings: Vec<Encoding>,
}

impl EmployeeRecord {
    pub fn new(name: impl Into<String>, encodings: Vec<Encoding>) -> Self {
        Self {
            name: name.into(),
            details: EmployeeDetails::default(),
            encodings,
        }
    }
}

/// Result of matching a probe encoding against the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    /// ID of the matched employee (if any).
    pub employee_id: Option<EmployeeId>,
    /// Name of the matched employee (if any).
    pub name: Option<String>,
    /// Mean confidence of the matched employee, 0.0 when nothing matched.
    pub confidence: f32,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self {
            matched: false,
            employee_id: None,
            name: None,
            confidence: 0.0,
        }
    }
}

/// One row of the employee listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmployeeSummary {
    pub id: EmployeeId,
    pub name: String,
    #[serde(flatten)]
    pub details: EmployeeDetails,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_employees: usize,
    pub total_samples: usize,
}
