//! Deployment pipeline

pub mod fsm;
pub mod runner;

pub use fsm::{PipelineFsm, Stage, StageEvent};
pub use runner::{
    recent_attempts, DeployOptions, FailureKind, PipelineFailure, PipelineOutcome, PipelineRunner,
};
