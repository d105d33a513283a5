//! aura-core: face location, embedding and gallery matching.
//!
//! Faces are located by an ordered list of strategies (SCRFD via ONNX Runtime,
//! then a SeetaFace cascade), embedded with ArcFace, and matched against an
//! in-memory gallery by clamped cosine similarity.

pub mod alignment;
pub mod cascade;
pub mod decode;
pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod recognizer;
pub mod scrfd;
pub mod service;
pub mod types;

pub use cascade::{CascadeDetector, CascadeParams};
pub use detector::{FaceDetector, FacePipeline, FaceRegion};
pub use gallery::{GalleryStatus, GalleryStore, IdentityCandidate, LoadReport};
pub use recognizer::{ArcFaceEmbedder, Embedder, EmbeddingExtractor};
pub use scrfd::ScrfdDetector;
pub use service::{FaceService, HealthStatus, ServiceError, ServiceInfo};
pub use types::{BoundingBox, CosineMatcher, Embedding, EnrolledIdentity, MatchResult, Matcher};
