pub mod model;
pub mod options;
pub mod sadtalker;
pub mod wav2lip;

pub use model::{AudioFormat, LocalModel, ModelKind};
pub use options::ModelOptions;
