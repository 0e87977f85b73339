pub mod constants;
pub mod helpers;
pub mod logging;
pub mod settings;

pub use constants::*;
pub use helpers::*;
pub use settings::{ReleaseSettings, Settings, ToolSettings};
