use std::path::{Path, PathBuf};

use fuser::MountOption;

use super::MqttFs;
use crate::config::MountConfig;

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount point {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("failed to mount at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Options passed to the kernel for a mount
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype("mqttfs".to_string()),
        MountOption::RW,
        MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mount `fs` and serve it until the filesystem is unmounted
///
/// Blocks the calling thread. The sync engine starts when the kernel calls
/// `init` and is shut down in `destroy`.
pub fn mount(fs: MqttFs, mountpoint: &Path, config: &MountConfig) -> Result<(), MountError> {
    if !mountpoint.is_dir() {
        return Err(MountError::NotADirectory(mountpoint.to_path_buf()));
    }

    tracing::info!(
        mountpoint = %mountpoint.display(),
        prefix = %fs.topics().prefix(),
        broker = %config.broker.host,
        "mounting"
    );

    fuser::mount2(fs, mountpoint, &mount_options(config)).map_err(|source| MountError::Mount {
        path: mountpoint.to_path_buf(),
        source,
    })?;

    tracing::info!(mountpoint = %mountpoint.display(), "unmounted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_other_is_opt_in() {
        let config = MountConfig::default();
        let options = mount_options(&config);
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(!options.contains(&MountOption::AllowOther));

        let config = MountConfig {
            allow_other: true,
            ..Default::default()
        };
        assert!(mount_options(&config).contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_mountpoint_must_be_a_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let fs = MqttFs::from_config(&MountConfig::default(), "token");

        let result = mount(fs, file.path(), &MountConfig::default());
        assert!(matches!(result, Err(MountError::NotADirectory(_))));
    }
}
