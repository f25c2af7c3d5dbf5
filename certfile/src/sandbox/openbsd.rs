// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! OpenBSD confinement with unveil(2) and pledge(2).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

pub(super) fn confine_filesystem(directory: &Path) -> std::io::Result<()> {
    let path = CString::new(directory.as_os_str().as_bytes())?;
    // SAFETY: both arguments are valid NUL-terminated strings.
    if unsafe { libc::unveil(path.as_ptr(), c"rwc".as_ptr()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: two null pointers lock the unveil list.
    if unsafe { libc::unveil(std::ptr::null(), std::ptr::null()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    tracing::info!(directory = %directory.display(), "Unveiled the certificate directory");
    Ok(())
}

pub(super) fn confine_syscalls() -> std::io::Result<()> {
    // SAFETY: the promises are a valid NUL-terminated string and a null execpromises
    // leaves them unchanged.
    if unsafe { libc::pledge(c"stdio cpath wpath fattr".as_ptr(), std::ptr::null()) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    tracing::info!("Pledged stdio cpath wpath fattr");
    Ok(())
}
