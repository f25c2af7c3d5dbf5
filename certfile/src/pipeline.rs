// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Receive freshly issued certificate material and install it.

use std::path::Path;

use tokio::io::AsyncRead;
use tracing::instrument;

use crate::channel::{Receiver, Tag};
use crate::config::Config;
use crate::error::Error;
use crate::installer::{self, CERTIFICATE, CHAIN, FULL_CHAIN};
use crate::sandbox::{PrivilegeGate, Sandbox};

/// Install the certificate, chain, and full chain sent over `channel` into `directory`.
///
/// The gate is entered before anything is read from the channel. The producer then sends
/// the chain, which is installed as `chain.pem`, followed by the certificate, which is
/// installed as `cert.pem`. Finally `fullchain.pem` is written from the certificate and
/// chain already in memory.
///
/// The channel is consumed and is closed when this returns, whether or not the installation
/// succeeded.
///
/// # Errors
///
/// The first failure stops the run and is returned; later files are not written. Files that
/// were already published stay published, and any file not yet reached keeps its previous
/// contents.
#[instrument(skip_all, err, fields(run_id = %uuid::Uuid::now_v7(), directory = %directory.display()))]
pub async fn install_certificates<C, S>(
    channel: C,
    directory: &Path,
    gate: PrivilegeGate<S>,
    config: &Config,
) -> Result<(), Error>
where
    C: AsyncRead + Unpin,
    S: Sandbox,
{
    let mut channel = Receiver::new(channel).with_limit(config.max_artifact_size);
    let confined = gate.enter(directory)?;

    let chain = channel.receive(Tag::Chain).await?;
    installer::install(&confined, &CHAIN, &chain, None)?;
    tracing::debug!(size = chain.len(), "{}: created", CHAIN.file_name());

    let certificate = channel.receive(Tag::Certificate).await?;
    installer::install(&confined, &CERTIFICATE, &certificate, None)?;
    tracing::debug!(size = certificate.len(), "{}: created", CERTIFICATE.file_name());

    installer::install(&confined, &FULL_CHAIN, &certificate, Some(&chain[..]))?;
    tracing::debug!(
        size = certificate.len() + chain.len(),
        "{}: created",
        FULL_CHAIN.file_name()
    );

    tracing::info!("Installed certificate files");
    Ok(())
}
