//! Pseudo-terminal pair allocation.

use std::ffi::{CStr, OsStr};
use std::fs;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::master::PtyMaster;
use crate::config::Config;

/// Large enough for any `/dev/pts/N` or `/dev/ttysNNN` name.
const TTY_NAME_MAX: usize = 128;

/// Options applied when allocating the pair.
#[derive(Debug, Clone, Default)]
pub struct PortOptions {
    /// Put the slave in raw mode (no echo, no line buffering, no output processing).
    pub raw: bool,
    /// Stable symlink to create for the slave device.
    pub link: Option<PathBuf>,
}

impl From<&Config> for PortOptions {
    fn from(config: &Config) -> Self {
        Self {
            raw: config.raw,
            link: config.link.clone(),
        }
    }
}

/// Pseudo-terminal errors
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Allocate(#[source] io::Error),
    #[error("failed to configure slave termios: {0}")]
    Termios(#[source] io::Error),
    #[error("failed to resolve slave path: {0}")]
    SlavePath(#[source] io::Error),
    #[error("failed to configure descriptor: {0}")]
    Descriptor(#[source] io::Error),
    #[error("failed to register master with the reactor: {0}")]
    Register(#[source] io::Error),
    #[error("failed to create link '{}': {}", .0.display(), .1)]
    Link(PathBuf, #[source] io::Error),
}

/// An allocated master/slave pair and the slave's device path.
///
/// The slave descriptor is held open for the lifetime of the endpoint so the
/// master does not see a hang-up while no client is connected. Dropping the
/// endpoint closes both descriptors and removes the link, if any.
///
/// Because the slave stays open, its input queue outlives any one client:
/// replies a client never read before closing the port are still queued
/// and the next client to open the path reads them first.
#[derive(Debug)]
pub struct PtyEndpoint {
    master: OwnedFd,
    slave: OwnedFd,
    path: PathBuf,
    link: Option<PathBuf>,
}

impl PtyEndpoint {
    /// Allocate a new pair.
    pub fn open(options: &PortOptions) -> Result<Self, PtyError> {
        let (master, slave) = openpty().map_err(PtyError::Allocate)?;

        set_cloexec(master.as_fd()).map_err(PtyError::Descriptor)?;
        set_cloexec(slave.as_fd()).map_err(PtyError::Descriptor)?;

        if options.raw {
            make_raw(slave.as_fd()).map_err(PtyError::Termios)?;
        }

        let path = tty_name(slave.as_fd()).map_err(PtyError::SlavePath)?;

        let mut endpoint = Self {
            master,
            slave,
            path,
            link: None,
        };

        if let Some(ref link) = options.link {
            create_link(link, &endpoint.path)?;
            endpoint.link = Some(link.clone());
        }

        info!(
            path = %endpoint.path.display(),
            link = ?endpoint.link,
            raw = options.raw,
            "Pseudo-terminal allocated"
        );

        Ok(endpoint)
    }

    /// Device path a client opens to talk to the responder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Symlink created for the slave, if one was requested.
    pub fn link(&self) -> Option<&Path> {
        self.link.as_deref()
    }

    /// A non-blocking async handle on a duplicate of the master descriptor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn master(&self) -> Result<PtyMaster, PtyError> {
        let fd = self.master.try_clone().map_err(PtyError::Descriptor)?;
        PtyMaster::new(fd)
    }

    #[cfg(test)]
    pub(crate) fn slave_fd(&self) -> BorrowedFd<'_> {
        self.slave.as_fd()
    }
}

impl Drop for PtyEndpoint {
    fn drop(&mut self) {
        if let Some(ref link) = self.link {
            remove_link(link, &self.path);
        }
        debug!(
            path = %self.path.display(),
            master = self.master.as_raw_fd(),
            slave = self.slave.as_raw_fd(),
            "Closing pseudo-terminal"
        );
    }
}

fn openpty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    // SAFETY: both out-pointers are valid; a null name, termios and winsize
    // ask for the defaults.
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
    let fds = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };
    Ok(fds)
}

fn make_raw(fd: BorrowedFd<'_>) -> io::Result<()> {
    let mut termios = MaybeUninit::<libc::termios>::uninit();

    // SAFETY: fd is open and termios points to writable storage.
    if unsafe { libc::tcgetattr(fd.as_raw_fd(), termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: tcgetattr succeeded and filled the struct.
    let mut termios = unsafe { termios.assume_init() };

    // SAFETY: termios is a valid, initialized struct.
    unsafe { libc::cfmakeraw(&mut termios) };

    // SAFETY: fd is open and termios is valid.
    if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn tty_name(fd: BorrowedFd<'_>) -> io::Result<PathBuf> {
    let mut buf = [0u8; TTY_NAME_MAX];

    // SAFETY: buf is writable for buf.len() bytes.
    let rc = unsafe { libc::ttyname_r(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }

    let name = CStr::from_bytes_until_nul(&buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(PathBuf::from(OsStr::from_bytes(name.to_bytes())))
}

fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: fcntl on an open descriptor.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Point `link` at `target`. An existing symlink is replaced; anything else
/// at that path is left alone and reported.
fn create_link(link: &Path, target: &Path) -> Result<(), PtyError> {
    let err = |e: io::Error| PtyError::Link(link.to_path_buf(), e);

    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!(link = %link.display(), "Replacing stale link");
            fs::remove_file(link).map_err(err)?;
        }
        Ok(_) => {
            return Err(err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "path exists and is not a symlink",
            )));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(err(e)),
    }

    std::os::unix::fs::symlink(target, link).map_err(err)
}

fn remove_link(link: &Path, target: &Path) {
    // Only remove the link if it still points at our device.
    match fs::read_link(link) {
        Ok(current) if current == target => {
            if let Err(e) = fs::remove_file(link) {
                warn!(link = %link.display(), error = %e, "Failed to remove link");
            }
        }
        Ok(current) => {
            debug!(link = %link.display(), target = %current.display(), "Link was repointed, leaving it");
        }
        Err(e) => {
            debug!(link = %link.display(), error = %e, "Link already gone");
        }
    }
}
