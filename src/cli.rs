//! Command-line surface and mount bootstrap
//!
//! `kvfs [options] <backing_dir> <mountpoint>`. The process refuses to
//! start with superuser privileges: the driver does no access checking of
//! its own, so a root mount would hand every caller the run-as-root view of
//! the backing store. Exit code is 0 on clean unmount, otherwise the errno
//! of the mount/run failure.

use crate::{dispatch::Dispatcher, fuse, logging};
use anyhow::Context;
use clap::Parser;
use fuser::MountOption;
use nix::unistd::Uid;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "kvfs", version, about = "Mount a hash-addressed key-value filesystem")]
pub struct Cli {
    /// Directory holding the hashed objects and the directory index
    pub backing_dir: PathBuf,

    /// Where to mount the virtual namespace
    pub mountpoint: PathBuf,

    /// Allow other users to access the mount (needs user_allow_other in
    /// /etc/fuse.conf)
    #[arg(long)]
    pub allow_other: bool,

    /// Unmount automatically when the process exits
    #[arg(long)]
    pub auto_unmount: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![MountOption::FSName("kvfs".to_string())];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        options
    }
}

pub fn run(cli: Cli) -> i32 {
    if Uid::current().is_root() || Uid::effective().is_root() {
        eprintln!("kvfs: refusing to run as root; mount as an unprivileged user");
        return 1;
    }
    if let Err(err) = logging::init(&cli.log_level, cli.log_file.as_deref()) {
        eprintln!("kvfs: failed to set up logging: {}", err);
        return 1;
    }
    match serve(&cli) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "mount failed");
            eprintln!("kvfs: {:#}", err);
            exit_code(&err)
        }
    }
}

fn serve(cli: &Cli) -> anyhow::Result<()> {
    let backing = cli
        .backing_dir
        .canonicalize()
        .with_context(|| format!("backing directory {}", cli.backing_dir.display()))?;
    let dispatcher = Dispatcher::new(backing)
        .with_context(|| "opening backing store and directory index")?;
    tracing::info!(
        backing = %cli.backing_dir.display(),
        mountpoint = %cli.mountpoint.display(),
        "mounting"
    );
    fuse::mount(dispatcher, &cli.mountpoint, &cli.mount_options())
        .with_context(|| format!("mounting at {}", cli.mountpoint.display()))?;
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.root_cause()
        .downcast_ref::<std::io::Error>()
        .and_then(|io| io.raw_os_error())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_order() {
        let cli = Cli::parse_from(["kvfs", "/data", "/mnt/kv"]);
        assert_eq!(cli.backing_dir, PathBuf::from("/data"));
        assert_eq!(cli.mountpoint, PathBuf::from("/mnt/kv"));
        assert!(!cli.allow_other);
    }

    #[test]
    fn mount_options_reflect_flags() {
        let cli = Cli::parse_from(["kvfs", "--allow-other", "--auto-unmount", "/d", "/m"]);
        let options = cli.mount_options();
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn missing_mountpoint_is_a_parse_error() {
        assert!(Cli::try_parse_from(["kvfs", "/only-backing"]).is_err());
    }
}
