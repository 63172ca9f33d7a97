//! FUSE filesystem over the MQTT node store
//!
//! # Architecture
//!
//! - `MqttFs`: path-level operations on the shared [`common::store::NodeStore`],
//!   publishing content changes through an injected
//!   [`common::sync::Publisher`]
//! - `Filesystem` impl: fuser callbacks, inode ↔ path translation and errno
//!   replies
//! - `mount`: kernel mount options and the blocking mount call
//!
//! # Sync Integration
//!
//! `MqttFs` owns the sync engine until the kernel calls `init`, which starts
//! it on its own thread. Broker messages then land in the same store the
//! callbacks read from. `destroy` disconnects and joins that thread before
//! the unmount completes.

mod adapter;
mod filesystem;
mod mount;

pub use adapter::{FsError, MqttFs, StatFs};
pub use mount::{mount, mount_options, MountError};
