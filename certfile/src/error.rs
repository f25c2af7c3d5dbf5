// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Error types for the certificate installer.

use std::path::PathBuf;

use crate::channel::Tag;
use crate::installer::{Operation, Role};

/// The single failure outcome of an installation run.
///
/// Every variant is fatal for the current run. Nothing is retried internally; a caller
/// that wants to try again must restart the whole pipeline with a fresh channel.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The process could not reduce its own privileges.
    ///
    /// No certificate data was read and no file was touched.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    /// Receiving certificate material from the peer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Writing or publishing one of the certificate files failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned while entering the sandbox.
///
/// These indicate a configuration or environment defect rather than a transient
/// condition, so retrying is not useful.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PrivilegeError {
    /// The certificate directory does not exist, is not a directory, or cannot be opened.
    ///
    /// The directory is never created by the installer.
    #[error("failed to open certificate directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Confining filesystem access to the certificate directory failed.
    #[error("failed to confine filesystem access to {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Restricting the set of permitted system calls failed.
    #[error("failed to restrict system calls: {0}")]
    Syscalls(#[source] std::io::Error),

    /// The process-wide sandbox was already handed out.
    ///
    /// Privilege reduction is irreversible and happens exactly once per process.
    #[error("the process sandbox has already been acquired")]
    AlreadyAcquired,
}

/// Errors returned while receiving an artifact from the channel.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransferError {
    /// Reading from the channel failed.
    #[error("an I/O error occurred receiving the {artifact}: {source}")]
    Io {
        artifact: Tag,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the channel before signalling the end of the artifact.
    #[error("the peer closed the channel before the {artifact} was complete")]
    PeerClosed { artifact: Tag },

    /// The peer sent a frame for something other than the artifact being received.
    ///
    /// This means the producer and this stage disagree on the protocol sequence.
    #[error("expected a frame for the {expected} but received tag {received}")]
    UnexpectedTag { expected: Tag, received: u32 },

    /// The artifact is larger than the configured limit.
    #[error("the {artifact} exceeds the limit of {limit} bytes")]
    TooLarge { artifact: Tag, limit: usize },
}

/// A failure creating, writing, or publishing one of the certificate files.
///
/// A temporary file may be left behind when this is returned. It is never the live
/// artifact and is truncated by the next run, so it is not cleaned up.
#[derive(Debug, thiserror::Error)]
#[error("failed to {operation} {file} while installing the {artifact}: {source}")]
pub struct StorageError {
    /// The artifact being installed.
    pub artifact: Role,
    /// The step that failed.
    pub operation: Operation,
    /// The file name, relative to the certificate directory.
    pub file: &'static str,
    #[source]
    pub source: std::io::Error,
}
