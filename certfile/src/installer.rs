// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Atomically publish certificate files.
//!
//! Each file is written to a temporary sibling, synced to disk, and renamed over the live
//! file. A reader that opens the live path concurrently sees either the complete previous
//! contents or the complete new contents. The temporary name is always the live name plus
//! `~` in the same directory, so both are on the same filesystem and the rename is atomic.

use std::io::Write;

use rustix::fs::{AtFlags, Mode, OFlags};
use tracing::instrument;

use crate::error::StorageError;
use crate::sandbox::Confined;

/// Readable by everyone, writable by no one.
const READ_ONLY: Mode = Mode::RUSR.union(Mode::RGRP).union(Mode::ROTH);

/// Temporary files are readable from creation so that there is no window after the rename
/// where readers are refused.
const TEMPORARY: Mode = READ_ONLY.union(Mode::WUSR);

/// The part an installed file plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Chain,
    Certificate,
    FullChain,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Chain => write!(f, "certificate chain"),
            Role::Certificate => write!(f, "certificate"),
            Role::FullChain => write!(f, "full chain"),
        }
    }
}

/// The step of an installation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Write,
    Sync,
    Rename,
    Chmod,
    SyncDirectory,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Write => write!(f, "write"),
            Operation::Sync => write!(f, "sync"),
            Operation::Rename => write!(f, "publish"),
            Operation::Chmod => write!(f, "set permissions on"),
            Operation::SyncDirectory => write!(f, "sync the directory containing"),
        }
    }
}

/// A file the installer publishes in the certificate directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifact {
    role: Role,
    file_name: &'static str,
    temporary_name: &'static str,
    mode: Mode,
}

/// The issuer chain as received.
pub const CHAIN: Artifact = Artifact {
    role: Role::Chain,
    file_name: "chain.pem",
    temporary_name: "chain.pem~",
    mode: READ_ONLY,
};

/// The certificate as received.
pub const CERTIFICATE: Artifact = Artifact {
    role: Role::Certificate,
    file_name: "cert.pem",
    temporary_name: "cert.pem~",
    mode: READ_ONLY,
};

/// The certificate followed by the chain.
pub const FULL_CHAIN: Artifact = Artifact {
    role: Role::FullChain,
    file_name: "fullchain.pem",
    temporary_name: "fullchain.pem~",
    mode: READ_ONLY,
};

impl Artifact {
    /// The live file name, relative to the certificate directory.
    pub fn file_name(&self) -> &'static str {
        self.file_name
    }

    /// The scratch file the content is staged in before it is published.
    pub fn temporary_name(&self) -> &'static str {
        self.temporary_name
    }

    /// The permission bits of the published file.
    pub fn mode(&self) -> u32 {
        u32::from(self.mode.bits())
    }

    fn error(
        &self,
        operation: Operation,
        file: &'static str,
    ) -> impl FnOnce(rustix::io::Errno) -> StorageError {
        let artifact = self.role;
        move |errno| StorageError {
            artifact,
            operation,
            file,
            source: errno.into(),
        }
    }
}

/// Write `primary`, followed by `secondary` if given, to the artifact's live path.
///
/// The data goes to the temporary file first, which is truncated if it already exists. It
/// is synced to storage before the handle is closed, so a write that would only fail on
/// flush (a full disk, for example) is caught before anything is published. The temporary
/// file is then renamed over the live file and made read-only. Finally the directory is
/// synced so the rename itself survives a crash.
///
/// # Errors
///
/// Any failing step aborts the installation. The live file is only ever replaced by the
/// rename, so on failure it still holds its previous contents (or does not exist).
#[instrument(skip_all, err, fields(artifact = artifact.file_name))]
pub fn install(
    confined: &Confined,
    artifact: &Artifact,
    primary: &[u8],
    secondary: Option<&[u8]>,
) -> Result<(), StorageError> {
    let directory = confined.directory();
    let temporary = artifact.temporary_name;

    let file = rustix::fs::openat(
        directory,
        temporary,
        OFlags::WRONLY | OFlags::CREATE | OFlags::TRUNC | OFlags::NOFOLLOW | OFlags::CLOEXEC,
        TEMPORARY,
    )
    .map_err(artifact.error(Operation::Create, temporary))?;
    let mut file = std::fs::File::from(file);

    let write_error = |source| StorageError {
        artifact: artifact.role,
        operation: Operation::Write,
        file: temporary,
        source,
    };
    file.write_all(primary).map_err(write_error)?;
    if let Some(secondary) = secondary {
        file.write_all(secondary).map_err(write_error)?;
    }
    file.sync_all().map_err(|source| StorageError {
        artifact: artifact.role,
        operation: Operation::Sync,
        file: temporary,
        source,
    })?;
    // close(2) has nothing left to report once sync_all has succeeded.
    drop(file);
    tracing::trace!(temporary, "staged");

    rustix::fs::renameat(directory, temporary, directory, artifact.file_name)
        .map_err(artifact.error(Operation::Rename, artifact.file_name))?;
    rustix::fs::chmodat(directory, artifact.file_name, artifact.mode, AtFlags::empty())
        .map_err(artifact.error(Operation::Chmod, artifact.file_name))?;
    rustix::fs::fsync(directory)
        .map_err(artifact.error(Operation::SyncDirectory, artifact.file_name))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use anyhow::Result;
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::sandbox::tests::enter_unconfined;

    fn mode(path: &std::path::Path) -> Result<u32> {
        Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
    }

    // Temporary files must be siblings of the live file so the rename never crosses a
    // filesystem boundary.
    #[test]
    fn temporary_names_are_siblings() {
        for artifact in [CHAIN, CERTIFICATE, FULL_CHAIN] {
            assert_eq!(
                artifact.temporary_name(),
                format!("{}~", artifact.file_name())
            );
            assert!(!artifact.file_name().contains('/'));
            assert_eq!(artifact.mode(), 0o444);
        }
    }

    #[test]
    fn install_publishes_read_only() -> Result<()> {
        let dir = TempDir::new()?;
        let confined = enter_unconfined(dir.path())?;

        install(&confined, &CERTIFICATE, b"certificate bytes\n", None)?;

        let live = dir.path().join("cert.pem");
        assert_eq!(std::fs::read(&live)?, b"certificate bytes\n");
        assert_eq!(mode(&live)?, 0o444);
        assert!(!dir.path().join("cert.pem~").exists());

        Ok(())
    }

    #[test]
    fn install_replaces_existing() -> Result<()> {
        let dir = TempDir::new()?;
        let live = dir.path().join("chain.pem");
        std::fs::write(&live, b"an old and much longer chain that must not leak through")?;
        std::fs::set_permissions(&live, std::fs::Permissions::from_mode(0o600))?;
        let confined = enter_unconfined(dir.path())?;

        install(&confined, &CHAIN, b"new chain", None)?;
        assert_eq!(std::fs::read(&live)?, b"new chain");
        assert_eq!(mode(&live)?, 0o444);

        // The previous run left the live file read-only; that must not block the next.
        install(&confined, &CHAIN, b"newer chain", None)?;
        assert_eq!(std::fs::read(&live)?, b"newer chain");
        assert_eq!(mode(&live)?, 0o444);

        Ok(())
    }

    #[test]
    fn stale_temporary_is_truncated() -> Result<()> {
        let dir = TempDir::new()?;
        std::fs::write(
            dir.path().join("cert.pem~"),
            b"garbage from an interrupted run, longer than the new content",
        )?;
        let confined = enter_unconfined(dir.path())?;

        install(&confined, &CERTIFICATE, b"fresh", None)?;
        assert_eq!(std::fs::read(dir.path().join("cert.pem"))?, b"fresh");

        Ok(())
    }

    #[test]
    fn empty_content() -> Result<()> {
        let dir = TempDir::new()?;
        let confined = enter_unconfined(dir.path())?;

        install(&confined, &FULL_CHAIN, b"", Some(&b""[..]))?;

        let live = dir.path().join("fullchain.pem");
        assert_eq!(std::fs::metadata(&live)?.len(), 0);
        assert_eq!(mode(&live)?, 0o444);

        Ok(())
    }

    #[test]
    fn failed_create_leaves_live_file() -> Result<()> {
        let dir = TempDir::new()?;
        let live = dir.path().join("cert.pem");
        std::fs::write(&live, b"previous certificate")?;
        // A directory in the way of the temporary file can't be opened for writing,
        // regardless of the privileges the tests run with.
        std::fs::create_dir(dir.path().join("cert.pem~"))?;
        let confined = enter_unconfined(dir.path())?;

        let error = install(&confined, &CERTIFICATE, b"replacement", None)
            .expect_err("the temporary path is a directory");
        assert_eq!(error.artifact, Role::Certificate);
        assert_eq!(error.operation, Operation::Create);
        assert_eq!(error.file, "cert.pem~");
        assert_eq!(std::fs::read(&live)?, b"previous certificate");

        Ok(())
    }

    // The staged file stays behind when it can't be published.
    #[test]
    fn failed_rename_keeps_temporary() -> Result<()> {
        let dir = TempDir::new()?;
        let live = dir.path().join("cert.pem");
        std::fs::create_dir(&live)?;
        std::fs::write(live.join("occupied"), b"")?;
        let confined = enter_unconfined(dir.path())?;

        let error = install(&confined, &CERTIFICATE, b"replacement", None)
            .expect_err("a non-empty directory can't be replaced by a file");
        assert_eq!(error.artifact, Role::Certificate);
        assert_eq!(error.operation, Operation::Rename);
        assert_eq!(error.file, "cert.pem");
        assert!(live.join("occupied").exists());
        assert_eq!(std::fs::read(dir.path().join("cert.pem~"))?, b"replacement");

        Ok(())
    }

    // A symlink planted at the temporary path is not followed.
    #[test]
    fn temporary_symlink_not_followed() -> Result<()> {
        let dir = TempDir::new()?;
        let outside = TempDir::new()?;
        let target = outside.path().join("target");
        std::fs::write(&target, b"do not overwrite")?;
        std::os::unix::fs::symlink(&target, dir.path().join("chain.pem~"))?;
        let confined = enter_unconfined(dir.path())?;

        let error = install(&confined, &CHAIN, b"chain", None).expect_err("symlink refused");
        assert_eq!(error.operation, Operation::Create);
        assert_eq!(std::fs::read(&target)?, b"do not overwrite");

        Ok(())
    }

    #[test]
    fn full_chain_keeps_newlines() -> Result<()> {
        let dir = TempDir::new()?;
        let confined = enter_unconfined(dir.path())?;
        let certificate = b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let chain = b"\n-----BEGIN CERTIFICATE-----\nBBBB\n-----END CERTIFICATE-----";

        install(&confined, &FULL_CHAIN, certificate, Some(&chain[..]))?;

        let written = std::fs::read(dir.path().join("fullchain.pem"))?;
        assert_eq!(written, [&certificate[..], &chain[..]].concat());

        Ok(())
    }

    proptest! {
        #[test]
        fn full_chain_is_concatenation(
            certificate in prop::collection::vec(any::<u8>(), 1..2048),
            chain in prop::collection::vec(any::<u8>(), 1..2048),
        ) {
            let dir = TempDir::new().unwrap();
            let confined = enter_unconfined(dir.path()).unwrap();

            install(&confined, &FULL_CHAIN, &certificate, Some(&chain[..])).unwrap();

            let written = std::fs::read(dir.path().join("fullchain.pem")).unwrap();
            prop_assert_eq!(written.len(), certificate.len() + chain.len());
            prop_assert_eq!(&written[..certificate.len()], &certificate[..]);
            prop_assert_eq!(&written[certificate.len()..], &chain[..]);
        }
    }
}
