use crate::engine::{EngineError, EngineHandle};
use crate::envelope;
use aura_core::gallery::IdentityCandidate;
use aura_core::service::ServiceError;
use serde::Deserialize;
use serde_json::{json, Map};
use zbus::interface;

pub const BUS_NAME: &str = "org.aura.FaceId1";
pub const OBJECT_PATH: &str = "/org/aura/FaceId1";

/// D-Bus interface for the Aura face identification daemon.
///
/// Bus name: org.aura.FaceId1
/// Object path: /org/aura/FaceId1
///
/// Every method returns a JSON envelope; domain failures never surface as D-Bus errors.
pub struct AuraService {
    engine: EngineHandle,
}

impl AuraService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

#[interface(name = "org.aura.FaceId1")]
impl AuraService {
    /// Identify every face in a base64-encoded image.
    async fn recognize(&self, image: String) -> zbus::fdo::Result<String> {
        tracing::info!(payload_bytes = image.len(), "recognize requested");
        Ok(recognize_response(self.engine.recognize(image).await))
    }

    /// Derive a representative embedding from 3 to 50 base64-encoded photos.
    async fn enroll(&self, external_id: String, images: Vec<String>) -> zbus::fdo::Result<String> {
        tracing::info!(external_id = %external_id, images = images.len(), "enroll requested");
        Ok(envelope::from_result(self.engine.enroll(external_id, images).await))
    }

    /// Run face location only and report the boxes.
    async fn test_detection(&self, image: String) -> zbus::fdo::Result<String> {
        tracing::info!(payload_bytes = image.len(), "test_detection requested");
        Ok(envelope::from_result(self.engine.test_detection(image).await))
    }

    /// Replace the gallery from a JSON list of identities.
    async fn load_gallery(&self, identities: String) -> zbus::fdo::Result<String> {
        let candidates = match parse_gallery_payload(&identities) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::info!(error = %e, "load_gallery: malformed payload");
                return Ok(envelope::failure(format!("invalid identities payload: {e}")));
            }
        };
        Ok(envelope::success(&self.engine.load_gallery(candidates)))
    }

    async fn health(&self) -> zbus::fdo::Result<String> {
        Ok(envelope::success(&self.engine.health()))
    }

    /// List the loaded identities.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(envelope::success(&self.engine.gallery_status()))
    }
}

/// A decode failure still reports an empty face list.
fn recognize_response<T: serde::Serialize>(result: Result<T, EngineError>) -> String {
    match result {
        Ok(report) => envelope::success(&report),
        Err(e @ EngineError::Service(ServiceError::Decode(_))) => {
            let mut extra = Map::new();
            extra.insert("faces".into(), json!([]));
            envelope::failure_with(e, extra)
        }
        Err(e) => envelope::failure(e),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GalleryPayload {
    List(Vec<IdentityCandidate>),
    Wrapped {
        #[serde(alias = "students")]
        identities: Vec<IdentityCandidate>,
    },
}

/// Accepts a bare array or an object holding the array under `identities` (or `students`).
fn parse_gallery_payload(json: &str) -> Result<Vec<IdentityCandidate>, serde_json::Error> {
    Ok(match serde_json::from_str(json)? {
        GalleryPayload::List(list) => list,
        GalleryPayload::Wrapped { identities } => identities,
    })
}
