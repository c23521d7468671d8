//! Resume checkpoints: sampling policy, durable store and background writer

mod policy;
mod store;
mod writer;

pub use policy::CheckpointPolicy;
#[cfg(unix)]
pub(crate) use store::set_private_permissions;
pub use store::{CheckpointError, CheckpointStore, ResumeCheckpoint};
pub use writer::CheckpointWriter;
