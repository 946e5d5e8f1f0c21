pub mod assets;
pub mod health;
pub mod interpreter;
pub mod orchestrator;
pub mod state;
pub mod types;
pub mod uploader;
pub mod validator;

pub use assets::{AssetResolver, StaticAssetIndex};
pub use health::HealthMonitor;
pub use interpreter::ResponseInterpreter;
pub use orchestrator::UploadOrchestrator;
pub use state::{UploadPhase, UploadSnapshot, UploadStateMachine};
pub use types::*;
pub use uploader::Uploader;
pub use validator::validate;
