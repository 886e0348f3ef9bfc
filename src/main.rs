use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use snapfs::config::{Cli, Command, SnapfsConfig};
use snapfs::fs::handles::HandleTable;
use snapfs::fs::inodes::InodeTable;
use snapfs::fs::SnapFs;
use snapfs::state::checkpoint::start_checkpoint_thread;
use snapfs::state::{snapshot, EntryTable, Store};

/// Write-end of the self-pipe used for signal notification.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

enum ShutdownAction {
    /// Second signal: force unmount.
    ForceUnmount,
    /// FUSE session ended on its own, or first-signal probe unmount succeeded.
    ExternalUnmount,
}

/// Attempt a regular (non-forced) unmount. Returns true if the mount was
/// successfully removed, i.e. the mount was not busy.
fn try_unmount(mountpoint: &Path) -> bool {
    std::process::Command::new("umount")
        .arg(mountpoint)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Block until shutdown conditions are met. Implements two-phase ctrl-C:
/// - First signal when mount is not busy: immediate clean unmount.
/// - First signal when mount is busy: report open handles and wait.
/// - Second signal: force unmount.
/// - FUSE session exits on its own: external unmount.
fn wait_for_shutdown(
    guard: &std::thread::JoinHandle<std::io::Result<()>>,
    file_handles: &HandleTable,
    inodes: &InodeTable,
    mountpoint: &Path,
) -> ShutdownAction {
    let mut pipe_fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(pipe_fds.as_mut_ptr()) } != 0 {
        error!(
            "Failed to create signal pipe: {}",
            std::io::Error::last_os_error()
        );
        return ShutdownAction::ForceUnmount;
    }

    SIGNAL_PIPE.store(pipe_fds[1], Ordering::Relaxed);

    unsafe {
        use nix::sys::signal::{signal, SigHandler, Signal};
        signal(Signal::SIGINT, SigHandler::Handler(signal_handler)).ok();
        signal(Signal::SIGTERM, SigHandler::Handler(signal_handler)).ok();
    }

    let mut first_signal_received = false;
    let mut poll_ticks: u32 = 0;

    let action = loop {
        let mut pfd = libc::pollfd {
            fd: pipe_fds[0],
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, 200) }; // 200 ms timeout

        if ret > 0 {
            let mut buf = [0u8; 1];
            unsafe {
                libc::read(pipe_fds[0], buf.as_mut_ptr() as *mut libc::c_void, 1);
            }

            if first_signal_received {
                eprintln!("snapfs: force unmounting...");
                break ShutdownAction::ForceUnmount;
            }

            if guard.is_finished() {
                break ShutdownAction::ExternalUnmount;
            }

            if try_unmount(mountpoint) {
                eprintln!("snapfs: unmounting (received signal)...");
                break ShutdownAction::ExternalUnmount;
            }

            first_signal_received = true;
            let open = file_handles.list_open();
            if open.is_empty() {
                eprintln!("snapfs: mount is busy, processes are using the mountpoint");
            } else {
                eprintln!("snapfs: mount is busy with {} open handle(s):", open.len());
                let display_cap = 10;
                for handle in open.iter().take(display_cap) {
                    let path = inodes
                        .get_path(handle.ino)
                        .unwrap_or_else(|| "<removed>".to_string());
                    eprintln!("  {}  (fh {})", path, handle.fh);
                }
                if open.len() > display_cap {
                    eprintln!("  and {} more...", open.len() - display_cap);
                }
            }
            eprintln!(
                "Close open files to unmount cleanly, or press ctrl-C again to force unmount."
            );
            continue;
        }

        if guard.is_finished() {
            break ShutdownAction::ExternalUnmount;
        }

        if first_signal_received {
            poll_ticks += 1;
            // Probe every ~1 second (5 ticks * 200ms).
            if poll_ticks % 5 == 0 && try_unmount(mountpoint) {
                eprintln!("snapfs: all clear, unmounting...");
                break ShutdownAction::ExternalUnmount;
            }
        }
    };

    SIGNAL_PIPE.store(-1, Ordering::Relaxed);
    unsafe {
        libc::close(pipe_fds[0]);
        libc::close(pipe_fds[1]);
    }

    action
}

fn init_logging(log_file: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_name = log_file
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("snapfs.log"));
    let file_appender = tracing_appender::rolling::never(log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        );
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to set tracing subscriber: {}", e);
    }
    guard
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            mountpoint,
            snapshot,
            capacity,
            log_file,
            checkpoint_secs,
        } => {
            // Create mountpoint if it doesn't exist
            if !mountpoint.exists() {
                if let Err(e) = std::fs::create_dir_all(&mountpoint) {
                    eprintln!("Error creating mountpoint {:?}: {}", mountpoint, e);
                    std::process::exit(1);
                }
            }

            let mountpoint = std::fs::canonicalize(&mountpoint).unwrap_or_else(|e| {
                eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
                std::process::exit(1);
            });

            if is_stale_fuse_mount(&mountpoint) {
                eprintln!(
                    "Error: {} is a stale FUSE mount (previous snapfs session didn't clean up).\n\
                     Fix with:  umount -f {}",
                    mountpoint.display(),
                    mountpoint.display(),
                );
                std::process::exit(1);
            }

            let log_guard = init_logging(&log_file);

            let config = SnapfsConfig {
                mountpoint,
                snapshot,
                capacity,
                log_file,
                checkpoint_secs,
            };
            let code = run_mount(config);
            drop(log_guard);
            std::process::exit(code);
        }
        Command::Unmount { mountpoint } => {
            unmount(&mountpoint);
        }
        Command::Inspect { snapshot, capacity } => {
            inspect(&snapshot, capacity);
        }
    }
}

/// Load, mount, serve until unmounted, save. Returns the process exit code.
fn run_mount(config: SnapfsConfig) -> i32 {
    info!(
        "snapfs starting: snapshot={}, mountpoint={}, capacity={}",
        config.snapshot.display(),
        config.mountpoint.display(),
        config.capacity
    );

    // The table must be fully loaded before the first callback can arrive.
    let table = match snapshot::load(&config.snapshot, config.capacity) {
        Ok(Some(table)) => table,
        Ok(None) => {
            info!(
                "No snapshot at {}, starting with an empty filesystem",
                config.snapshot.display()
            );
            EntryTable::new(config.capacity)
        }
        Err(e) => {
            error!("Failed to load snapshot {}: {}", config.snapshot.display(), e);
            return 1;
        }
    };
    let store = Arc::new(Store::new(table));

    let shutdown = Arc::new(AtomicBool::new(false));
    let checkpoint_handle = if config.checkpoint_secs > 0 {
        match start_checkpoint_thread(
            Arc::clone(&store),
            config.snapshot.clone(),
            config.checkpoint_secs,
            shutdown.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start checkpoint thread: {}", e);
                None
            }
        }
    } else {
        None
    };

    let snapfs = SnapFs::new(Arc::clone(&store));
    let mut file_handles_arc = Arc::clone(&snapfs.file_handles);
    let mut inodes_arc = Arc::clone(&snapfs.inodes);

    let mut fuse_config = fuser::Config::default();
    fuse_config.mount_options = vec![
        fuser::MountOption::FSName("snapfs".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::DefaultPermissions,
    ];
    fuse_config.acl = fuser::SessionACL::All;

    info!("Mounting snapfs filesystem...");

    let session = match fuser::spawn_mount2(snapfs, &config.mountpoint, &fuse_config) {
        Ok(session) => session,
        Err(e) => {
            if e.raw_os_error() == Some(libc::EPERM) || e.to_string().contains("allow_other") {
                fuse_config.acl = fuser::SessionACL::Owner;
                info!("Retrying mount without allow_other...");
                let retry_fs = SnapFs::new(Arc::clone(&store));
                file_handles_arc = Arc::clone(&retry_fs.file_handles);
                inodes_arc = Arc::clone(&retry_fs.inodes);
                match fuser::spawn_mount2(retry_fs, &config.mountpoint, &fuse_config) {
                    Ok(session) => session,
                    Err(e) => {
                        error!("Failed to mount: {}", e);
                        stop_checkpoints(&shutdown, checkpoint_handle);
                        return 1;
                    }
                }
            } else {
                error!("Failed to mount: {}", e);
                stop_checkpoints(&shutdown, checkpoint_handle);
                return 1;
            }
        }
    };

    info!("snapfs mounted at {}", config.mountpoint.display());

    let action = wait_for_shutdown(
        &session.guard,
        &file_handles_arc,
        &inodes_arc,
        &config.mountpoint,
    );

    stop_checkpoints(&shutdown, checkpoint_handle);

    match action {
        ShutdownAction::ForceUnmount => {
            if let Err(e) = session.umount_and_join() {
                error!("Error during unmount, trying force unmount: {}", e);
                let mp = config.mountpoint.to_string_lossy();
                let _ = std::process::Command::new("umount")
                    .args(["-f", &*mp])
                    .status();
            }
        }
        ShutdownAction::ExternalUnmount => {
            if let Err(e) = session.join() {
                error!("Error joining FUSE session: {}", e);
            }
        }
    }

    // The session has been joined: no callback can run from here on.
    let code = match store.save_to(&config.snapshot) {
        Ok(_) => 0,
        Err(e) => {
            error!("Failed to save snapshot {}: {}", config.snapshot.display(), e);
            1
        }
    };

    eprintln!("snapfs: unmounted {}", config.mountpoint.display());
    code
}

fn stop_checkpoints(shutdown: &AtomicBool, handle: Option<std::thread::JoinHandle<()>>) {
    shutdown.store(true, Ordering::Relaxed);
    if let Some(handle) = handle {
        let _ = handle.join();
    }
}

fn inspect(snapshot_path: &PathBuf, capacity: std::num::NonZeroUsize) {
    match snapshot::load(snapshot_path, capacity) {
        Ok(Some(table)) => match serde_json::to_string_pretty(&table.describe()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Ok(None) => {
            eprintln!("Error: snapshot {:?} does not exist", snapshot_path);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: snapshot {:?}: {}", snapshot_path, e);
            std::process::exit(1);
        }
    }
}

/// Check if `path` is a stale FUSE mount: it appears in `mount` output as a
/// fuse/macfuse volume but is no longer functional (readdir fails).
fn is_stale_fuse_mount(path: &Path) -> bool {
    let output = match std::process::Command::new("mount").output() {
        Ok(o) => o,
        Err(_) => return false,
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let path_str = path.to_string_lossy();
    let is_fuse_mount = stdout.lines().any(|line| {
        line.contains(path_str.as_ref()) && (line.contains("fuse") || line.contains("macfuse"))
    });
    if !is_fuse_mount {
        return false;
    }
    std::fs::read_dir(path).is_err()
}

fn unmount(mountpoint: &PathBuf) {
    let mountpoint = std::fs::canonicalize(mountpoint).unwrap_or_else(|e| {
        eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
        std::process::exit(1);
    });
    let mp = mountpoint.to_string_lossy();
    eprintln!("Unmounting {}...", mp);

    let output = std::process::Command::new("umount").arg(&*mp).output();

    if matches!(&output, Ok(o) if o.status.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }

    if let Ok(ref o) = output {
        let stderr = String::from_utf8_lossy(&o.stderr);
        if stderr.contains("busy") {
            eprintln!(
                "Mount point is busy. Make sure no shells or processes are using {}, then try again.",
                mp
            );
            std::process::exit(1);
        }
    }

    // Try diskutil unmount (macOS)
    let output = std::process::Command::new("diskutil")
        .args(["unmount", &*mp])
        .output();

    if matches!(&output, Ok(o) if o.status.success()) {
        eprintln!("Successfully unmounted {}", mp);
        return;
    }

    // Force unmount as last resort
    let status = std::process::Command::new("umount")
        .args(["-f", &*mp])
        .status();

    if matches!(status, Ok(s) if s.success()) {
        eprintln!("Successfully unmounted {} (forced)", mp);
        return;
    }

    eprintln!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp);
    std::process::exit(1);
}
