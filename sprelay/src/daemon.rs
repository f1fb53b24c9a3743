//! Daemonization.
//!
//! Detachment is a capability behind [`ProcessDetacher`] so the rest of the
//! daemon does not care whether the platform can fork. On unix it is the
//! classic `daemon(3)` sequence; elsewhere backgrounding is left to the
//! service manager.
//!
//! Detaching forks the process, so it must run before the compio runtime
//! and the publisher worker threads exist.
//!
//! The PID file path is resolved against the launch directory before
//! detaching, since the detached process runs from `/`. The file is created
//! with mode 0644 whatever the umask.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DetachError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    #[error("setsid failed: {0}")]
    Setsid(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("process {pid} recorded in {} is still running", path.display())]
    AlreadyRunning { pid: i32, path: PathBuf },

    #[error("cannot write pid file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Detach(#[from] DetachError),

    #[error(transparent)]
    PidFile(#[from] PidFileError),
}

/// Turns the calling process into a background process.
pub trait ProcessDetacher {
    /// Detach from the controlling terminal.
    ///
    /// Returns in the detached process only; any process left behind in the
    /// foreground has already exited with status 0.
    fn detach(&self) -> Result<(), DetachError>;
}

/// `fork` + `setsid` detacher, same steps as `daemon(3)`.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkDetacher {
    /// Keep the current working directory instead of moving to `/`
    pub nochdir: bool,
    /// Keep stdin/stdout/stderr instead of pointing them at `/dev/null`
    pub noclose: bool,
}

#[cfg(unix)]
impl ProcessDetacher for ForkDetacher {
    #[allow(unsafe_code)]
    fn detach(&self) -> Result<(), DetachError> {
        use nix::sys::stat::{umask, Mode};
        use nix::unistd::{chdir, fork, setsid, ForkResult};

        // SAFETY: called from the single-threaded startup path, before the
        // runtime or any worker thread is created.
        match unsafe { fork() }.map_err(|e| DetachError::Fork(e.into()))? {
            ForkResult::Parent { child } => {
                debug!("Forked daemon process {}", child);
                std::process::exit(0);
            }
            ForkResult::Child => {}
        }

        setsid().map_err(|e| DetachError::Setsid(e.into()))?;

        if !self.nochdir {
            if let Err(e) = chdir("/") {
                warn!("chdir(/) failed: {}", e);
            }
        }

        umask(Mode::empty());

        if !self.noclose {
            if let Err(e) = redirect_std_streams() {
                warn!("Keeping original standard streams: {}", e);
            }
        }

        Ok(())
    }
}

/// Point stdin, stdout and stderr at `/dev/null`.
#[cfg(unix)]
fn redirect_std_streams() -> io::Result<()> {
    use nix::unistd::dup2;
    use std::os::unix::io::AsRawFd;

    let null = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = null.as_raw_fd();

    for target in [
        io::stdin().as_raw_fd(),
        io::stdout().as_raw_fd(),
        io::stderr().as_raw_fd(),
    ] {
        dup2(fd, target).map_err(io::Error::from)?;
    }
    Ok(())
}

/// Detacher for platforms without `fork`: the process stays where it is and
/// the host service manager is expected to run it in the background.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisedDetacher;

impl ProcessDetacher for SupervisedDetacher {
    fn detach(&self) -> Result<(), DetachError> {
        info!("No fork on this platform, leaving backgrounding to the service manager");
        Ok(())
    }
}

/// The detacher used by the binary on this platform.
#[cfg(unix)]
pub fn platform_detacher() -> impl ProcessDetacher {
    ForkDetacher::default()
}

/// The detacher used by the binary on this platform.
#[cfg(not(unix))]
pub fn platform_detacher() -> impl ProcessDetacher {
    SupervisedDetacher
}

/// A written PID file. It is left in place for external tooling to manage.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

/// Permissions of a newly written PID file.
pub const PIDFILE_MODE: u32 = 0o644;

impl PidFile {
    /// Record the current process id at `path`.
    pub fn create(path: &Path) -> Result<Self, PidFileError> {
        Self::create_for(path, std::process::id())
    }

    /// Record `pid` at `path`.
    ///
    /// Refuses when the file names another process that is still alive;
    /// stale or unreadable files are overwritten.
    pub fn create_for(path: &Path, pid: u32) -> Result<Self, PidFileError> {
        Self::check_free(path, pid)?;

        write_pid(path, pid).map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    /// Fail with `AlreadyRunning` when `path` names a live process other
    /// than `pid`.
    pub fn check_free(path: &Path, pid: u32) -> Result<(), PidFileError> {
        if let Some(existing) = read_pid(path) {
            if u32::try_from(existing).ok() != Some(pid) && process_alive(existing) {
                return Err(PidFileError::AlreadyRunning {
                    pid: existing,
                    path: path.to_path_buf(),
                });
            }
            debug!("Replacing stale pid file {} (pid {})", path.display(), existing);
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

fn write_pid(path: &Path, pid: u32) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        opts.mode(PIDFILE_MODE);
        let mut file = opts.open(path)?;
        // mode() only applies on creation; an existing file keeps its bits
        file.set_permissions(fs::Permissions::from_mode(PIDFILE_MODE))?;
        writeln!(file, "{}", pid)
    }
    #[cfg(not(unix))]
    {
        let mut file = opts.open(path)?;
        writeln!(file, "{}", pid)
    }
}

/// `path` made absolute against the current directory.
pub fn absolute_pidfile(path: &Path) -> Result<PathBuf, PidFileError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // pid <= 0 addresses process groups, never a single daemon
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}

/// Detach with `detacher`, then record the detached process in `pidfile`.
///
/// A relative `pidfile` is taken relative to the launch directory. A PID
/// file held by a live process is reported before detaching, while stderr
/// still reaches the operator.
pub fn daemonize(
    detacher: &impl ProcessDetacher,
    pidfile: &Path,
) -> Result<PidFile, DaemonError> {
    let pidfile = absolute_pidfile(pidfile)?;
    PidFile::check_free(&pidfile, std::process::id())?;

    detacher.detach()?;
    let pid = PidFile::create(&pidfile)?;
    info!("Running as daemon, pid {} written to {}", pid.pid(), pidfile.display());
    Ok(pid)
}
