// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! macOS confinement with the built-in `no-network` sandbox profile.

use std::ffi::{c_char, c_int};
use std::path::Path;

/// The profile argument names one of the built-in profiles.
const SANDBOX_NAMED: u64 = 0x0001;

#[allow(non_upper_case_globals)]
extern "C" {
    static kSBXProfileNoNetwork: *const c_char;

    fn sandbox_init(profile: *const c_char, flags: u64, errorbuf: *mut *mut c_char) -> c_int;
}

pub(super) fn confine_filesystem(directory: &Path) -> std::io::Result<()> {
    super::change_root(directory)
}

pub(super) fn confine_syscalls() -> std::io::Result<()> {
    // SAFETY: the profile is a constant exported by libsystem_sandbox and a null error buffer
    // tells sandbox_init not to allocate an error message.
    if unsafe { sandbox_init(kSBXProfileNoNetwork, SANDBOX_NAMED, std::ptr::null_mut()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    tracing::info!("Applied the no-network sandbox profile");
    Ok(())
}
