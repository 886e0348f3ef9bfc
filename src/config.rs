use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "snapfs", about = "In-memory FUSE filesystem persisted to a snapshot file")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a snapfs filesystem
    Mount {
        /// Path to the mount point
        mountpoint: PathBuf,

        /// Snapshot file loaded at mount and written at unmount
        snapshot: PathBuf,

        /// Maximum number of files and directories
        #[arg(long, default_value = "1000")]
        capacity: NonZeroUsize,

        /// Log file path
        #[arg(long, default_value = "/tmp/snapfs.log")]
        log_file: PathBuf,

        /// Seconds between background snapshot checkpoints (0 disables)
        #[arg(long, default_value_t = 0)]
        checkpoint_secs: u64,
    },
    /// Unmount a snapfs filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
    /// Print the entries of a snapshot file as JSON
    Inspect {
        /// Snapshot file to decode
        snapshot: PathBuf,

        /// Capacity to validate the snapshot against
        #[arg(long, default_value = "1000")]
        capacity: NonZeroUsize,
    },
}

#[derive(Debug, Clone)]
pub struct SnapfsConfig {
    pub mountpoint: PathBuf,
    pub snapshot: PathBuf,
    pub capacity: NonZeroUsize,
    pub log_file: PathBuf,
    pub checkpoint_secs: u64,
}
