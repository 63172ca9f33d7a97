use anyhow::Context;
use clap::Parser;

use mqttfs_daemon::{logging, Args, MountConfig};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = MountConfig::load(args.config.as_deref()).context("loading config")?;
    let _log_guard = logging::init(config.log_dir.as_deref());

    run(args, config)
}

#[cfg(feature = "fuse")]
fn run(args: Args, config: MountConfig) -> anyhow::Result<()> {
    use mqttfs_daemon::fuse::{self, MqttFs};

    let fs = MqttFs::from_config(&config, &args.token);
    fuse::mount(fs, &args.mountpoint, &config)
        .with_context(|| format!("serving {}", args.mountpoint.display()))
}

#[cfg(not(feature = "fuse"))]
fn run(args: Args, _config: MountConfig) -> anyhow::Result<()> {
    anyhow::bail!(
        "cannot mount {}: mqttfs was built without the `fuse` feature",
        args.mountpoint.display()
    )
}
