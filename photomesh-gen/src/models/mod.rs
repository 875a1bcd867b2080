//! Data models for photomesh-gen
//!
//! - Request and uploaded image types
//! - Per-request state machine
//! - Stage outcomes and the response payload

pub mod pipeline_run;
pub mod request;
pub mod result;

pub use pipeline_run::{PipelineRun, StateTransition};
pub use request::{ImageAsset, ImageKind, ReconstructionRequest};
pub use result::{
    Artifact, ArtifactInfo, ArtifactKind, BackgroundRemovalSummary, DirectoryInfo, ErrorKind,
    FailureInfo, FallbackReason, MaskedImageResult, MeshFormat, PipelineResult,
    ReconstructionArtifactSet,
};
