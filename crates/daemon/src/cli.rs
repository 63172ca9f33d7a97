use std::path::PathBuf;

use clap::Parser;

/// Mount an MQTT broker as a filesystem
#[derive(Parser, Debug, Clone)]
#[command(name = "mqttfs", version, about)]
pub struct Args {
    /// Directory to mount the filesystem on
    pub mountpoint: PathBuf,

    /// Broker access token, sent as the MQTT username
    #[arg(short, long, env = "MQTTFS_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Config file (defaults to <config dir>/mqttfs/config.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mountpoint_and_token() {
        let args = Args::try_parse_from(["mqttfs", "/mnt/mqtt", "-t", "secret"]).unwrap();
        assert_eq!(args.mountpoint, PathBuf::from("/mnt/mqtt"));
        assert_eq!(args.token, "secret");
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_config_flag() {
        let args = Args::try_parse_from([
            "mqttfs",
            "/mnt/mqtt",
            "--token",
            "secret",
            "--config",
            "/etc/mqttfs.toml",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/mqttfs.toml")));
    }

    #[test]
    fn test_mountpoint_is_required() {
        assert!(Args::try_parse_from(["mqttfs", "--token", "secret"]).is_err());
    }
}
