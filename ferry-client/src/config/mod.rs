//! Client configuration

mod settings;

pub use settings::{ReconnectSettings, ResumeSettings, Settings, TransferSettings};
