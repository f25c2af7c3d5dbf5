// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The command line interface for `certfile-installer`.

use std::path::PathBuf;

use clap::Parser;

/// Install freshly issued TLS certificates.
///
/// The certificate chain and the certificate are read from a producer over a channel and
/// installed as chain.pem, cert.pem, and fullchain.pem in the certificate directory. The
/// process confines itself to that directory before reading anything.
///
/// By default the channel is stdin, which suits systemd socket activation with Accept=yes.
#[derive(Debug, Parser)]
#[command(version, name = "certfile-installer")]
pub struct Cli {
    /// The path to the installer's configuration file.
    ///
    /// If no path is provided, the defaults are used. To view the configuration,
    /// run the `config` subcommand.
    #[arg(long, short, env = "CERTFILE_CONFIG")]
    pub config: Option<PathBuf>,

    /// A set of one or more comma-separated directives to filter logs.
    ///
    /// The general format is "target_name[span_name{field=value}]=level" where level is
    /// one of TRACE, DEBUG, INFO, WARN, ERROR.
    ///
    /// Details: https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[arg(long, env = "CERTFILE_LOG", default_value = "WARN,certfile=INFO")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Receive the certificate material and install it.
    Install {
        /// Install into this directory rather than the one in the configuration file.
        ///
        /// The directory must already exist.
        #[arg(long, env = "CERTFILE_DIRECTORY")]
        certificate_directory: Option<PathBuf>,

        /// If provided, bind a Unix socket to the given location and read from the first
        /// producer that connects to it rather than using stdin.
        #[arg(long)]
        socket: Option<PathBuf>,
    },

    /// See the current installer configuration.
    Config,
}
