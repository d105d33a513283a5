//! In-memory gallery of enrolled identities.
//!
//! The only mutation is a whole-gallery replacement. The replacement is built
//! off to the side and swapped in under the same lock readers take, so a
//! reader sees either the old gallery or the new one, never a mix.

use crate::types::{Embedding, EnrolledIdentity, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Cap on the number of skip reasons returned from a load.
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Immutable view of the gallery at one point in time.
pub type GallerySnapshot = Arc<Vec<EnrolledIdentity>>;

/// An identity offered for loading, as supplied by the external source of truth.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityCandidate {
    #[serde(alias = "externalId", alias = "studentId")]
    pub external_id: String,
    #[serde(alias = "displayName", alias = "name")]
    pub display_name: String,
    #[serde(alias = "faceEmbeddings", default)]
    pub embedding: Vec<f32>,
}

/// Summary of a `replace_all` call.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub loaded_count: usize,
    pub skipped_count: usize,
    pub total_requested: usize,
    /// At most [`MAX_REPORTED_ERRORS`] reasons; `skipped_count` is always exact.
    pub errors: Vec<String>,
}

/// One row of [`GalleryStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub index: usize,
    pub display_name: String,
    pub external_id: String,
    pub embedding_dimension: usize,
}

/// Consistent listing of the gallery contents.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryStatus {
    /// "ready" or "empty".
    pub state: &'static str,
    pub loaded_identity_count: usize,
    pub embedding_dimension: usize,
    pub threshold: f32,
    pub identities: Vec<IdentitySummary>,
}

/// Concurrency-guarded gallery, owned by the service and shared by handle.
pub struct GalleryStore {
    entries: Mutex<GallerySnapshot>,
    accepted_dims: Vec<usize>,
}

impl Default for GalleryStore {
    fn default() -> Self {
        Self::new(vec![EMBEDDING_DIM])
    }
}

impl GalleryStore {
    /// Empty gallery accepting embeddings of the given dimensions.
    pub fn new(accepted_dims: Vec<usize>) -> Self {
        Self {
            entries: Mutex::new(Arc::new(Vec::new())),
            accepted_dims,
        }
    }

    // A panic while holding the lock cannot leave a half-written gallery
    // (the guarded value is only ever replaced whole), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, GallerySnapshot> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current gallery. Holding the snapshot does not block a reload.
    pub fn snapshot(&self) -> GallerySnapshot {
        Arc::clone(&self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Replace the whole gallery with the valid candidates.
    ///
    /// Candidates with no embedding values or an unaccepted dimension are
    /// skipped and the reason recorded. Accepted embeddings are normalized.
    pub fn replace_all(&self, candidates: Vec<IdentityCandidate>) -> LoadReport {
        let total_requested = candidates.len();
        tracing::info!(count = total_requested, "loading identities");

        let mut loaded = Vec::with_capacity(total_requested);
        let mut skipped_count = 0;
        let mut errors = Vec::new();

        for candidate in candidates {
            match self.validate(candidate) {
                Ok(identity) => loaded.push(identity),
                Err(reason) => {
                    skipped_count += 1;
                    tracing::debug!(%reason, "identity skipped");
                    if errors.len() < MAX_REPORTED_ERRORS {
                        errors.push(reason);
                    }
                }
            }
        }

        let loaded_count = loaded.len();
        *self.lock() = Arc::new(loaded);

        tracing::info!(loaded = loaded_count, skipped = skipped_count, "gallery replaced");

        LoadReport { loaded_count, skipped_count, total_requested, errors }
    }

    fn validate(&self, candidate: IdentityCandidate) -> Result<EnrolledIdentity, String> {
        let dim = candidate.embedding.len();
        if dim == 0 {
            return Err(format!("{}: No embeddings", candidate.display_name));
        }
        if !self.accepted_dims.contains(&dim) {
            let expected: Vec<String> =
                self.accepted_dims.iter().map(|d| format!("{d}d")).collect();
            return Err(format!(
                "{}: Invalid dimension {dim}d (expected {})",
                candidate.display_name,
                expected.join(" or ")
            ));
        }

        Ok(EnrolledIdentity {
            external_id: candidate.external_id,
            display_name: candidate.display_name,
            embedding: Embedding::new(candidate.embedding).normalize(),
        })
    }

    /// List the gallery contents from a single snapshot.
    pub fn status(&self, threshold: f32) -> GalleryStatus {
        let snapshot = self.snapshot();
        let identities: Vec<IdentitySummary> = snapshot
            .iter()
            .enumerate()
            .map(|(index, identity)| IdentitySummary {
                index,
                display_name: identity.display_name.clone(),
                external_id: identity.external_id.clone(),
                embedding_dimension: identity.embedding.dim(),
            })
            .collect();

        GalleryStatus {
            state: if identities.is_empty() { "empty" } else { "ready" },
            loaded_identity_count: identities.len(),
            embedding_dimension: EMBEDDING_DIM,
            threshold,
            identities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn candidate(id: &str, embedding: Vec<f32>) -> IdentityCandidate {
        IdentityCandidate {
            external_id: id.into(),
            display_name: format!("Student {id}"),
            embedding,
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 3.0;
        v
    }

    #[test]
    fn test_replace_all_loads_and_normalizes() {
        let store = GalleryStore::default();
        let report =
            store.replace_all(vec![candidate("a", unit(512, 0)), candidate("b", unit(512, 1))]);

        assert_eq!(report.loaded_count, 2);
        assert_eq!(report.skipped_count, 0);
        assert_eq!(report.total_requested, 2);
        assert!(report.errors.is_empty());

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].external_id, "a");
        assert!((snapshot[0].embedding.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_wrong_dimension_rejected() {
        let store = GalleryStore::default();
        let report = store.replace_all(vec![candidate("x", vec![0.5; 256])]);

        assert_eq!(report.loaded_count, 0);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("256"), "error: {}", report.errors[0]);
        assert!(report.errors[0].contains("512"), "error: {}", report.errors[0]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let store = GalleryStore::default();
        let report = store.replace_all(vec![candidate("x", vec![]), candidate("y", unit(512, 3))]);
        assert_eq!(report.loaded_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.errors, vec!["Student x: No embeddings".to_string()]);
    }

    #[test]
    fn test_errors_capped_but_skip_count_exact() {
        let store = GalleryStore::default();
        let candidates = (0..25).map(|i| candidate(&i.to_string(), vec![1.0; 3])).collect();
        let report = store.replace_all(candidates);
        assert_eq!(report.skipped_count, 25);
        assert_eq!(report.errors.len(), MAX_REPORTED_ERRORS);
    }

    #[test]
    fn test_replace_discards_previous_gallery() {
        let store = GalleryStore::default();
        store.replace_all(vec![candidate("a", unit(512, 0)), candidate("b", unit(512, 1))]);
        store.replace_all(vec![candidate("c", unit(512, 2))]);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].external_id, "c");
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let store = GalleryStore::default();
        store.replace_all(vec![candidate("a", unit(512, 0))]);
        let before = store.snapshot();
        store.replace_all(vec![]);
        assert_eq!(before.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_custom_accepted_dims() {
        let store = GalleryStore::new(vec![128, 512]);
        let report =
            store.replace_all(vec![candidate("a", unit(128, 0)), candidate("b", vec![1.0; 64])]);
        assert_eq!(report.loaded_count, 1);
        assert!(report.errors[0].contains("expected 128d or 512d"));
    }

    #[test]
    fn test_deserialize_reference_field_names() {
        let json = r#"[
            {"studentId": "s1", "name": "Ada", "faceEmbeddings": [1.0, 0.0]},
            {"external_id": "s2", "display_name": "Bob", "embedding": [0.0, 1.0]},
            {"externalId": "s3", "displayName": "Cy"}
        ]"#;
        let parsed: Vec<IdentityCandidate> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0].external_id, "s1");
        assert_eq!(parsed[0].display_name, "Ada");
        assert_eq!(parsed[1].embedding, vec![0.0, 1.0]);
        assert!(parsed[2].embedding.is_empty());
    }

    #[test]
    fn test_status_lists_identities() {
        let store = GalleryStore::default();
        assert_eq!(store.status(0.68).state, "empty");

        store.replace_all(vec![candidate("a", unit(512, 0))]);
        let status = store.status(0.68);
        assert_eq!(status.state, "ready");
        assert_eq!(status.loaded_identity_count, 1);
        assert_eq!(status.identities[0].display_name, "Student a");
        assert_eq!(status.identities[0].embedding_dimension, 512);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_gallery() {
        let store = Arc::new(GalleryStore::default());
        let small: Vec<IdentityCandidate> = (0..3)
            .map(|i| candidate(&format!("s{i}"), unit(512, i)))
            .collect();
        let large: Vec<IdentityCandidate> = (0..50)
            .map(|i| candidate(&format!("l{i}"), unit(512, i)))
            .collect();
        store.replace_all(small.clone());

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    let batch = if i % 2 == 0 { large.clone() } else { small.clone() };
                    store.replace_all(batch);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        assert!(
                            snapshot.len() == 3 || snapshot.len() == 50,
                            "observed intermediate gallery of {} entries",
                            snapshot.len()
                        );
                        let prefix = if snapshot.len() == 3 { "s" } else { "l" };
                        assert!(snapshot.iter().all(|e| e.external_id.starts_with(prefix)));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
