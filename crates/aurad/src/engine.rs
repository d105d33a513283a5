use crate::config::Config;
use aura_core::cascade::{CascadeDetector, CascadeParams};
use aura_core::gallery::{GalleryStatus, GalleryStore, IdentityCandidate, LoadReport};
use aura_core::recognizer::{ArcFaceEmbedder, EmbeddingExtractor};
use aura_core::scrfd::ScrfdDetector;
use aura_core::service::{
    DetectionReport, EnrollReport, FaceService, HealthStatus, RecognizeReport, ServiceError,
    ServiceInfo,
};
use aura_core::{FaceDetector, FacePipeline};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests allowed to wait for the engine at once.
const ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Recognize {
        payload: String,
        reply: Reply<RecognizeReport>,
    },
    Enroll {
        external_id: String,
        images: Vec<String>,
        reply: Reply<EnrollReport>,
    },
    TestDetection {
        payload: String,
        reply: Reply<DetectionReport>,
    },
}

/// Clone-safe handle to the engine thread and the shared gallery.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    gallery: Arc<GalleryStore>,
    info: ServiceInfo,
    timeout: Duration,
}

impl EngineHandle {
    pub async fn recognize(&self, payload: String) -> Result<RecognizeReport, EngineError> {
        self.request(|reply| EngineRequest::Recognize { payload, reply }).await
    }

    pub async fn enroll(
        &self,
        external_id: String,
        images: Vec<String>,
    ) -> Result<EnrollReport, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            external_id,
            images,
            reply,
        })
        .await
    }

    pub async fn test_detection(&self, payload: String) -> Result<DetectionReport, EngineError> {
        self.request(|reply| EngineRequest::TestDetection { payload, reply }).await
    }

    /// Replace the gallery. Does not wait for in-flight recognitions.
    pub fn load_gallery(&self, candidates: Vec<IdentityCandidate>) -> LoadReport {
        self.gallery.replace_all(candidates)
    }

    pub fn health(&self) -> HealthStatus {
        self.info.health(&self.gallery)
    }

    pub fn gallery_status(&self) -> GalleryStatus {
        self.gallery.status(self.info.threshold)
    }

    /// Queue a request and wait for its reply, both under the request timeout.
    ///
    /// A timed-out request is abandoned, not cancelled; the engine still runs it.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(build(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f32(),
                    "engine request timed out"
                );
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }
}

/// Load whichever models are present and assemble the service.
///
/// Missing or broken model files leave the service degraded rather than
/// failing startup: no SCRFD means cascade only, no ArcFace means every
/// face contributes nothing.
pub fn build_service(config: &Config, gallery: Arc<GalleryStore>) -> FaceService {
    let mut strategies: Vec<Box<dyn FaceDetector>> = Vec::new();

    match ScrfdDetector::load(&config.detector_model_path()) {
        Ok(detector) => strategies.push(Box::new(detector)),
        Err(e) => tracing::warn!(error = %e, "primary detector unavailable; continuing without it"),
    }

    match CascadeDetector::load(&config.cascade_model_path(), CascadeParams::default()) {
        Ok(detector) => strategies.push(Box::new(detector)),
        Err(e) => tracing::warn!(error = %e, "cascade detector unavailable; continuing without it"),
    }

    if strategies.is_empty() {
        tracing::warn!(
            model_dir = %config.model_dir.display(),
            "no face detector loaded; every image will report no faces"
        );
    }

    let extractor = match ArcFaceEmbedder::load(&config.embedder_model_path()) {
        Ok(embedder) => EmbeddingExtractor::new(Box::new(embedder)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "embedding model unavailable; recognition and enrollment disabled"
            );
            EmbeddingExtractor::unavailable()
        }
    };

    FaceService::new(
        FacePipeline::new(strategies),
        extractor,
        gallery,
        config.similarity_threshold,
    )
}

/// Build the service on a dedicated OS thread and return a handle to it.
///
/// The models never leave the engine thread. Requests are served one at a
/// time in arrival order.
pub fn spawn_engine<F>(
    build: F,
    gallery: Arc<GalleryStore>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError>
where
    F: FnOnce(Arc<GalleryStore>) -> FaceService + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<ServiceInfo>();
    let engine_gallery = Arc::clone(&gallery);

    std::thread::Builder::new().name("aura-engine".into()).spawn(move || {
        let mut service = build(engine_gallery);
        if ready_tx.send(service.info()).is_err() {
            return;
        }

        tracing::info!("engine thread started");
        while let Some(req) = rx.blocking_recv() {
            match req {
                EngineRequest::Recognize { payload, reply } => {
                    let result = run_guarded("recognize", || service.recognize(&payload));
                    let _ = reply.send(result);
                }
                EngineRequest::Enroll { external_id, images, reply } => {
                    let result = run_guarded("enroll", || {
                        service.enroll_identity(&external_id, &images)
                    });
                    let _ = reply.send(result);
                }
                EngineRequest::TestDetection { payload, reply } => {
                    let result = run_guarded("test_detection", || service.test_detection(&payload));
                    let _ = reply.send(result);
                }
            }
        }
        tracing::info!("engine thread exiting");
    })?;

    // A panic while loading models drops the sender
    let info = ready_rx
        .recv()
        .map_err(|_| EngineError::Internal("engine failed to start".into()))?;

    tracing::info!(
        model_available = info.model_available,
        detectors = ?info.detectors,
        threshold = info.threshold,
        "engine ready"
    );

    Ok(EngineHandle { tx, gallery, info, timeout })
}

/// Run one request in its own span, converting a panic into `EngineError::Internal`.
fn run_guarded<T>(
    op: &'static str,
    f: impl FnOnce() -> Result<T, ServiceError>,
) -> Result<T, EngineError> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("request", op, id = %request_id);
    let _enter = span.enter();
    let started = Instant::now();

    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "request complete");
            Ok(value)
        }
        Ok(Err(e)) => {
            tracing::info!(error = %e, "request failed");
            Err(e.into())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "request panicked; engine continues");
            Err(EngineError::Internal(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
