// Mount-side modules
pub mod cli;
pub mod config;
#[cfg(feature = "fuse")]
pub mod fuse;
pub mod logging;

pub use cli::Args;
pub use config::{ConfigError, MountConfig};
