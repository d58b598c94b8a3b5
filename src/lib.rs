pub mod apiserver;
pub mod cli;
pub mod config;
pub mod controlplane;
pub mod error;
pub mod extract;
pub mod k8s;
pub mod orchestrator;
pub mod persist;
pub mod process;
pub mod readiness;
pub mod registrar;

pub use error::{ExtractorError, Phase, PhaseError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
