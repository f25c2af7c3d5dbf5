// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The last stage of certificate issuance: install what the producer sends.
//!
//! The certificate chain and certificate are read over stdin, or over a Unix socket if one
//! is requested, and installed in the certificate directory.

use std::path::PathBuf;

use anyhow::Context;
use certfile::{
    cli::{Cli, Command},
    config::{Config, load_config},
    install_certificates,
    sandbox::{PrivilegeGate, SystemSandbox},
};
use clap::Parser;
use tokio::net::UnixListener;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt};

// The path, relative to $CONFIGURATION_DIRECTORY, of the default config file location.
const DEFAULT_CONFIG: &str = "certfile/installer.toml";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    // Unfortunately we can't use clap's value_parser since EnvFilter does not
    // implement Clone.
    let log_filter = EnvFilter::builder().parse(&opts.log_filter).context(
        "CERTFILE_LOG contains an invalid log directive; refer to \
            https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/\
            filter/struct.EnvFilter.html#directives for format details.",
    )?;
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(log_filter);
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");

    let mut config = load_config::<Config>(opts.config, PathBuf::from(DEFAULT_CONFIG).as_path())?;

    match opts.command {
        Command::Install {
            certificate_directory,
            socket,
        } => {
            if let Some(certificate_directory) = certificate_directory {
                config.certificate_directory = certificate_directory;
            }
            let gate = PrivilegeGate::new(SystemSandbox::acquire()?);
            let directory = config.certificate_directory.clone();

            let result = if let Some(socket) = socket {
                let listener = UnixListener::bind(&socket)
                    .with_context(|| format!("Failed to bind to {}", &socket.display()))?;
                let (stream, _) = listener
                    .accept()
                    .await
                    .with_context(|| format!("Failed to accept a producer on {}", socket.display()))?;
                drop(listener);
                // Once confined the socket path is out of reach, so remove it now.
                _ = std::fs::remove_file(&socket).inspect_err(|error| {
                    tracing::warn!(?socket, ?error, "Failed to remove the producer socket");
                });
                install_certificates(stream, &directory, gate, &config).await
            } else {
                install_certificates(tokio::io::stdin(), &directory, gate, &config).await
            };
            result.inspect_err(|error| {
                tracing::error!(%error, "Certificate installation failed");
            })?;
        }
        Command::Config => {
            println!(
                "# This is the current configuration\n\n{config}\n# This concludes the configuration.\n"
            );
        }
    }

    Ok(())
}
