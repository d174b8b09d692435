mod settings;

pub use settings::{ChatOptions, LogConfig, Settings};
