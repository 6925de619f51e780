//! Fingerprints, actionability, and classification precedence.

use super::store::OverrideStore;
use crate::types::{Classification, EntitySnapshot, EntityStatus, ErrorClass, PathReason};
use std::collections::HashMap;
use std::sync::Arc;

/// Fingerprint used when an entity carries no identity at all.
pub const NO_RECOVERY_FINGERPRINT: &str = "<no-recovery-fingerprint>";

/// Error classes for which probing a failure yields a classification.
pub const PROBE_ACTIONABLE_CLASSES: [ErrorClass; 3] = [
    ErrorClass::MissingFiles,
    ErrorClass::PermissionDenied,
    ErrorClass::DiskFull,
];

/// Error classes for which a resume goes through the recovery gate.
///
/// Deliberately wider than [`PROBE_ACTIONABLE_CLASSES`]; the two sets answer
/// different questions and must stay separate.
pub const RESUME_GATE_CLASSES: [ErrorClass; 5] = [
    ErrorClass::Unknown,
    ErrorClass::LocalError,
    ErrorClass::MissingFiles,
    ErrorClass::PermissionDenied,
    ErrorClass::DiskFull,
];

/// Stable retry/classification key for `entity`.
///
/// Envelope fingerprint, then content hash, then numeric id, then
/// [`NO_RECOVERY_FINGERPRINT`]. Never fails.
pub fn recovery_fingerprint(entity: &EntitySnapshot) -> String {
    let envelope_fingerprint = entity
        .error_envelope
        .as_ref()
        .and_then(|envelope| envelope.fingerprint.as_deref())
        .filter(|fp| !fp.is_empty());
    if let Some(fp) = envelope_fingerprint {
        return fp.to_string();
    }
    if let Some(hash) = entity.hash.as_deref().filter(|h| !h.is_empty()) {
        return hash.to_string();
    }
    if let Some(id) = entity.id {
        return id.to_string();
    }
    NO_RECOVERY_FINGERPRINT.to_string()
}

pub fn is_actionable_for_probe_classification(error_class: Option<ErrorClass>) -> bool {
    error_class.is_some_and(|class| PROBE_ACTIONABLE_CLASSES.contains(&class))
}

/// Paused entities with a gate-eligible error resume through recovery.
pub fn should_use_recovery_gate_for_resume(entity: &EntitySnapshot) -> bool {
    entity.status == EntityStatus::Paused
        && entity
            .error_class()
            .is_some_and(|class| RESUME_GATE_CLASSES.contains(&class))
}

/// Path reason implied by an error class. Unknown classes read as `missing`.
pub fn derive_path_reason(error_class: Option<ErrorClass>) -> PathReason {
    match error_class {
        Some(ErrorClass::PermissionDenied) => PathReason::Unwritable,
        Some(ErrorClass::DiskFull) => PathReason::DiskFull,
        _ => PathReason::Missing,
    }
}

/// Holds session classifications and consults the persisted override store.
pub struct ClassificationResolver {
    session: HashMap<String, Classification>,
    store: Arc<dyn OverrideStore>,
}

impl ClassificationResolver {
    pub fn new(store: Arc<dyn OverrideStore>) -> Self {
        Self {
            session: HashMap::new(),
            store,
        }
    }

    pub fn record_session_classification(&mut self, fingerprint: &str, value: Classification) {
        self.session.insert(fingerprint.to_string(), value);
    }

    pub fn session_classification(&self, fingerprint: &str) -> Option<&Classification> {
        self.session.get(fingerprint)
    }

    /// Drop the ephemeral classification for `fingerprint`.
    pub fn end_session(&mut self, fingerprint: &str) -> Option<Classification> {
        self.session.remove(fingerprint)
    }

    pub fn persisted_override(&self, entity: &EntitySnapshot) -> Option<Classification> {
        entity.entity_key().and_then(|key| self.store.get(&key))
    }

    /// Write (or with `None`, clear) the persisted override. Entities without
    /// an id or hash cannot carry one; returns whether the write happened.
    pub fn set_persisted_override(
        &self,
        entity: &EntitySnapshot,
        value: Option<Classification>,
    ) -> bool {
        match entity.entity_key() {
            Some(key) => {
                self.store.set(&key, value);
                true
            }
            None => false,
        }
    }

    /// Session classification wins over the persisted override.
    pub fn resolve_classification(&self, entity: &EntitySnapshot) -> Option<Classification> {
        let fingerprint = recovery_fingerprint(entity);
        let session = self.session.get(&fingerprint).cloned();
        let stored = self.persisted_override(entity);

        if session.is_none()
            && stored.is_none()
            && !is_actionable_for_probe_classification(entity.error_class())
        {
            return None;
        }
        session.or(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::InMemoryOverrideStore;
    use crate::types::{ByteCounts, Confidence, ErrorEnvelope};
    use pretty_assertions::assert_eq;

    fn resolver() -> (ClassificationResolver, Arc<InMemoryOverrideStore>) {
        let store = Arc::new(InMemoryOverrideStore::new());
        (ClassificationResolver::new(store.clone()), store)
    }

    fn paused_with(class: ErrorClass) -> EntitySnapshot {
        EntitySnapshot::new(EntityStatus::Paused)
            .with_hash("h1")
            .with_error(ErrorEnvelope::new(class))
    }

    #[test]
    fn fingerprint_precedence() {
        let enveloped = EntitySnapshot::new(EntityStatus::Paused)
            .with_hash("H1")
            .with_id(42)
            .with_error(ErrorEnvelope::new(ErrorClass::Unknown).with_fingerprint("F1"));
        assert_eq!(recovery_fingerprint(&enveloped), "F1");

        let hashed = EntitySnapshot::new(EntityStatus::Paused)
            .with_hash("H1")
            .with_id(42);
        assert_eq!(recovery_fingerprint(&hashed), "H1");

        let numbered = EntitySnapshot::new(EntityStatus::Paused).with_id(42);
        assert_eq!(recovery_fingerprint(&numbered), "42");

        let bare = EntitySnapshot::new(EntityStatus::Paused);
        assert_eq!(recovery_fingerprint(&bare), NO_RECOVERY_FINGERPRINT);
    }

    #[test]
    fn empty_envelope_fingerprint_falls_through() {
        let entity = EntitySnapshot::new(EntityStatus::Paused)
            .with_hash("H1")
            .with_error(ErrorEnvelope::new(ErrorClass::Unknown).with_fingerprint(""));
        assert_eq!(recovery_fingerprint(&entity), "H1");
    }

    #[test]
    fn classification_set_is_narrow() {
        assert!(is_actionable_for_probe_classification(Some(
            ErrorClass::MissingFiles
        )));
        assert!(is_actionable_for_probe_classification(Some(
            ErrorClass::PermissionDenied
        )));
        assert!(is_actionable_for_probe_classification(Some(
            ErrorClass::DiskFull
        )));
        assert!(!is_actionable_for_probe_classification(Some(
            ErrorClass::Unknown
        )));
        assert!(!is_actionable_for_probe_classification(Some(
            ErrorClass::LocalError
        )));
        assert!(!is_actionable_for_probe_classification(None));
    }

    #[test]
    fn resume_gate_requires_paused() {
        assert!(should_use_recovery_gate_for_resume(&paused_with(
            ErrorClass::Unknown
        )));
        assert!(should_use_recovery_gate_for_resume(&paused_with(
            ErrorClass::LocalError
        )));
        assert!(!should_use_recovery_gate_for_resume(&paused_with(
            ErrorClass::Other
        )));

        let mut downloading = paused_with(ErrorClass::MissingFiles);
        downloading.status = EntityStatus::Downloading;
        assert!(!should_use_recovery_gate_for_resume(&downloading));

        let clean = EntitySnapshot::new(EntityStatus::Paused).with_hash("h1");
        assert!(!should_use_recovery_gate_for_resume(&clean));
    }

    #[test]
    fn path_reason_mapping() {
        assert_eq!(
            derive_path_reason(Some(ErrorClass::PermissionDenied)),
            PathReason::Unwritable
        );
        assert_eq!(
            derive_path_reason(Some(ErrorClass::DiskFull)),
            PathReason::DiskFull
        );
        assert_eq!(
            derive_path_reason(Some(ErrorClass::MissingFiles)),
            PathReason::Missing
        );
        assert_eq!(
            derive_path_reason(Some(ErrorClass::LocalError)),
            PathReason::Missing
        );
        assert_eq!(derive_path_reason(None), PathReason::Missing);
    }

    #[test]
    fn session_wins_over_stored() {
        let (mut resolver, store) = resolver();
        let entity = paused_with(ErrorClass::MissingFiles);
        let session = Classification::PathNeeded {
            reason: PathReason::Missing,
        };
        let stored = Classification::DataMissing {
            confidence: Confidence::Certain,
            bytes: ByteCounts {
                expected_bytes: 10,
                on_disk_bytes: 0,
                missing_bytes: 10,
                to_download_bytes: 10,
            },
        };

        store.set("h1", Some(stored.clone()));
        assert_eq!(resolver.resolve_classification(&entity), Some(stored));

        resolver.record_session_classification("h1", session.clone());
        assert_eq!(resolver.resolve_classification(&entity), Some(session));
    }

    #[test]
    fn non_actionable_without_sources_resolves_none() {
        let (resolver, _store) = resolver();
        assert_eq!(
            resolver.resolve_classification(&paused_with(ErrorClass::LocalError)),
            None
        );
        assert_eq!(
            resolver.resolve_classification(&paused_with(ErrorClass::MissingFiles)),
            None
        );
    }

    #[test]
    fn stored_override_applies_to_non_actionable_entity() {
        let (resolver, _store) = resolver();
        let entity = paused_with(ErrorClass::Other);
        let value = Classification::PathNeeded {
            reason: PathReason::Unwritable,
        };

        assert!(resolver.set_persisted_override(&entity, Some(value.clone())));
        assert_eq!(resolver.resolve_classification(&entity), Some(value));

        assert!(resolver.set_persisted_override(&entity, None));
        assert_eq!(resolver.resolve_classification(&entity), None);
    }

    #[test]
    fn anonymous_entity_cannot_hold_override() {
        let (resolver, store) = resolver();
        let anonymous = EntitySnapshot::new(EntityStatus::Paused);

        assert!(!resolver.set_persisted_override(
            &anonymous,
            Some(Classification::PathNeeded {
                reason: PathReason::Missing
            })
        ));
        assert!(store.is_empty());
    }
}
