// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

/*!
# certfile

certfile is the last stage of a certificate issuance pipeline. It receives a freshly issued
certificate and its issuer chain from a producer process over an already-connected channel and
installs them in a directory that other services, such as a TLS server, read from.

Certificate material is sensitive, but installing it requires very little authority. Before a
single byte is read from the channel, the process confines itself to the certificate directory and,
where the platform allows, to the handful of system calls needed to write files. If that fails,
nothing is installed.

## Output

Three files are written to the certificate directory, all with mode `0444`:

* `chain.pem` - the issuer chain as received.
* `cert.pem` - the certificate as received.
* `fullchain.pem` - the certificate immediately followed by the chain.

Each file is staged under a temporary name (the final name with a `~` suffix) and renamed into
place, so a server reloading its certificates concurrently never observes a partially written
file. If a run fails, files that were not yet reached keep their previous contents.

## Crate features

* **cli** -
  Include the `certfile-installer` command line interface. This is a default feature.
*/

#[cfg(feature = "cli")]
pub mod cli;
pub mod channel;
pub mod config;
pub mod error;
pub mod installer;
pub mod pipeline;
pub mod sandbox;

pub use pipeline::install_certificates;
