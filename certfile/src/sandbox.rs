// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Reduce the privileges of the process before touching any certificate data.
//!
//! Entering the sandbox is a one-way transition. The [`PrivilegeGate`] is consumed when it is
//! entered and produces a [`Confined`] token, which is the only way to reach the certificate
//! directory. File installation takes the token, so it cannot happen before the process has
//! given up its ambient authority.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rustix::fs::{Mode, OFlags};
use tracing::instrument;

use crate::error::PrivilegeError;

/// The platform mechanisms used to confine the process.
///
/// Implementations are not required to support both steps; a step the platform has no
/// mechanism for should succeed without doing anything.
pub trait Sandbox {
    /// Restrict filesystem access to `directory`, which is known to exist.
    fn confine_filesystem(&mut self, directory: &Path) -> std::io::Result<()>;

    /// Restrict the process to basic I/O and creating, writing, and renaming files.
    ///
    /// This is called after [`Sandbox::confine_filesystem`] has succeeded.
    fn confine_syscalls(&mut self) -> std::io::Result<()>;
}

/// Tracks whether the process-wide [`SystemSandbox`] was handed out.
static ACQUIRED: AtomicBool = AtomicBool::new(false);

/// The operating system's sandbox.
///
/// * On Linux (x86_64 and aarch64), a Landlock ruleset limits filesystem access to the
///   certificate directory, and the process also changes its root to it when running as root.
///   A seccomp filter then refuses every system call the installation doesn't need, including
///   all socket creation.
/// * On macOS, the process changes its root when running as root and applies the
///   `no-network` sandbox profile.
/// * On OpenBSD, the certificate directory is the only path unveiled and the process pledges
///   `stdio cpath wpath fattr`.
/// * Elsewhere both steps do nothing.
#[derive(Debug)]
pub struct SystemSandbox {
    _private: (),
}

impl SystemSandbox {
    /// Take the process's sandbox.
    ///
    /// # Errors
    ///
    /// Privileges can only be reduced once per process, so every call after the first one
    /// returns [`PrivilegeError::AlreadyAcquired`].
    pub fn acquire() -> Result<Self, PrivilegeError> {
        if ACQUIRED.swap(true, Ordering::SeqCst) {
            return Err(PrivilegeError::AlreadyAcquired);
        }
        Ok(Self { _private: () })
    }
}

impl Sandbox for SystemSandbox {
    fn confine_filesystem(&mut self, directory: &Path) -> std::io::Result<()> {
        platform::confine_filesystem(directory)
    }

    fn confine_syscalls(&mut self) -> std::io::Result<()> {
        platform::confine_syscalls()
    }
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod linux;
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
use linux as platform;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use macos as platform;

#[cfg(target_os = "openbsd")]
mod openbsd;
#[cfg(target_os = "openbsd")]
use openbsd as platform;

#[cfg(not(any(
    all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")),
    target_os = "macos",
    target_os = "openbsd"
)))]
mod platform {
    use std::path::Path;

    pub(super) fn confine_filesystem(_directory: &Path) -> std::io::Result<()> {
        tracing::warn!("Filesystem confinement is not available: running without it");
        Ok(())
    }

    pub(super) fn confine_syscalls() -> std::io::Result<()> {
        tracing::warn!("System call confinement is not available: running without it");
        Ok(())
    }
}

/// Change the root directory to `directory` if the process is allowed to.
#[cfg(any(
    all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")),
    target_os = "macos"
))]
fn change_root(directory: &Path) -> std::io::Result<()> {
    if !rustix::process::geteuid().is_root() {
        tracing::debug!("Not running as root; the root directory is left unchanged");
        return Ok(());
    }
    rustix::process::chroot(directory)?;
    rustix::process::chdir("/")?;
    tracing::info!(directory = %directory.display(), "Changed root to the certificate directory");
    Ok(())
}

/// The one-time transition into the sandbox.
#[derive(Debug)]
pub struct PrivilegeGate<S> {
    sandbox: S,
}

impl<S: Sandbox> PrivilegeGate<S> {
    pub fn new(sandbox: S) -> Self {
        Self { sandbox }
    }

    /// Confine the process to `directory`.
    ///
    /// The directory is opened first; it must already exist and is never created. Filesystem
    /// confinement follows, then system call confinement. A failure at any point stops the
    /// sequence and nothing after it runs.
    ///
    /// # Errors
    ///
    /// Returns a [`PrivilegeError`] if the directory can't be opened or either step fails.
    /// The process may be partially confined at that point and should exit.
    #[instrument(skip(self), err)]
    pub fn enter(mut self, directory: &Path) -> Result<Confined, PrivilegeError> {
        let handle = rustix::fs::open(
            directory,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )
        .map_err(|errno| PrivilegeError::Directory {
            path: directory.to_path_buf(),
            source: errno.into(),
        })?;

        self.sandbox
            .confine_filesystem(directory)
            .map_err(|source| PrivilegeError::Filesystem {
                path: directory.to_path_buf(),
                source,
            })?;
        self.sandbox
            .confine_syscalls()
            .map_err(PrivilegeError::Syscalls)?;
        tracing::debug!("Entered the sandbox");

        Ok(Confined { directory: handle })
    }
}

/// Proof that the process has been confined to the certificate directory.
///
/// This owns the directory handle that all certificate files are created relative to.
#[derive(Debug)]
pub struct Confined {
    directory: OwnedFd,
}

impl Confined {
    pub(crate) fn directory(&self) -> BorrowedFd<'_> {
        self.directory.as_fd()
    }
}
