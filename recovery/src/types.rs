//! Entity and classification vocabulary shared by every recovery component.

use serde::{Deserialize, Serialize};

/// Authoritative status of a transfer entity as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Paused,
    Checking,
    Downloading,
    Seeding,
    Queued,
    Error,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Seeding => "seeding",
            Self::Queued => "queued",
            Self::Error => "error",
        }
    }
}

/// Error categories surfaced by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    MissingFiles,
    PermissionDenied,
    DiskFull,
    Unknown,
    LocalError,
    Other,
}

impl ErrorClass {
    /// Map a filesystem error kind onto the recovery taxonomy.
    pub fn from_io_kind(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;

        match kind {
            ErrorKind::NotFound => Self::MissingFiles,
            ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => Self::PermissionDenied,
            ErrorKind::StorageFull => Self::DiskFull,
            _ => Self::LocalError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingFiles => "missingFiles",
            Self::PermissionDenied => "permissionDenied",
            Self::DiskFull => "diskFull",
            Self::Unknown => "unknown",
            Self::LocalError => "localError",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to an entity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub error_class: ErrorClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(error_class: ErrorClass) -> Self {
        Self {
            fingerprint: None,
            error_class,
            message: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One entity as it appears in an authoritative snapshot.
///
/// Every identity field is optional: partially populated snapshots (freshly
/// added magnets, half-deserialized payloads) must still be usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub name: String,
    pub status: EntityStatus,
    /// Fraction of pieces verified while a recheck runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_envelope: Option<ErrorEnvelope>,
}

impl EntitySnapshot {
    pub fn new(status: EntityStatus) -> Self {
        Self {
            id: None,
            hash: None,
            name: String::new(),
            status,
            verification_progress: None,
            error_envelope: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_verification_progress(mut self, progress: f64) -> Self {
        self.verification_progress = Some(progress);
        self
    }

    pub fn with_error(mut self, envelope: ErrorEnvelope) -> Self {
        self.error_envelope = Some(envelope);
        self
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.error_envelope.as_ref().map(|e| e.error_class)
    }

    /// Key used by the overlay map and the persisted override store.
    ///
    /// Prefers the stable content hash; falls back to the numeric id.
    pub fn entity_key(&self) -> Option<String> {
        match (&self.hash, self.id) {
            (Some(hash), _) if !hash.is_empty() => Some(hash.clone()),
            (_, Some(id)) => Some(id.to_string()),
            _ => None,
        }
    }

    /// True while the daemon is still verifying on-disk data.
    pub fn is_transitional(&self) -> bool {
        if self.status == EntityStatus::Checking {
            return true;
        }
        self.verification_progress.is_some_and(|p| p > 0.0 && p < 1.0)
    }
}

/// User operation that produced an optimistic overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    Recheck,
    Resume,
    Pause,
    Relocate,
    Remove,
}

/// Why a download location must be supplied before recovery can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathReason {
    #[serde(rename = "unwritable")]
    Unwritable,
    #[serde(rename = "disk-full")]
    DiskFull,
    #[serde(rename = "missing")]
    Missing,
}

impl PathReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unwritable => "unwritable",
            Self::DiskFull => "disk-full",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Certain,
    Likely,
    Unknown,
}

/// Byte accounting reported by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteCounts {
    pub expected_bytes: u64,
    pub on_disk_bytes: u64,
    pub missing_bytes: u64,
    pub to_download_bytes: u64,
}

/// Result of probing a failed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Classification {
    #[serde(rename = "path-needed")]
    PathNeeded { reason: PathReason },
    #[serde(rename = "path_missing")]
    PathMissing {
        confidence: Confidence,
        #[serde(flatten)]
        bytes: ByteCounts,
        path: String,
    },
    #[serde(rename = "data_missing")]
    DataMissing {
        confidence: Confidence,
        #[serde(flatten)]
        bytes: ByteCounts,
    },
}

impl Classification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathNeeded { .. } => "path-needed",
            Self::PathMissing { .. } => "path_missing",
            Self::DataMissing { .. } => "data_missing",
        }
    }
}
