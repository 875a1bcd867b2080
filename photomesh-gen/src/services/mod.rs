//! Pipeline stages and their collaborators

pub mod background_removal;
pub mod pipeline_orchestrator;
pub mod reconstruction;
pub mod result_assembler;
pub mod triposr;
pub mod validator;
pub mod work_directory;

pub use background_removal::{
    BackgroundRemovalError, BackgroundRemovalStage, BackgroundRemover, PhotoroomClient,
};
pub use pipeline_orchestrator::PipelineOrchestrator;
pub use reconstruction::{
    collect_artifacts, GpuGate, ReconstructionError, ReconstructionModel, ReconstructionStage,
    RuntimeLocation,
};
pub use result_assembler::{AssemblyContext, ResultAssembler};
pub use triposr::TripoSrModel;
pub use validator::{ImageValidator, ValidationError, ValidationReport};
pub use work_directory::{ReleaseOutcome, WorkDirectory, WorkDirectoryError, WorkDirectoryManager};
