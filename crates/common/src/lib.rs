//! Shared core of mqttfs
//!
//! - [`store`]: the in-memory directory tree served by the mount
//! - [`sync`]: the MQTT side, mapping paths to topics and applying broker
//!   messages to the tree
//!
//! Nothing here depends on FUSE, so the whole core is testable without a
//! kernel mount.

pub mod store;
pub mod sync;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

