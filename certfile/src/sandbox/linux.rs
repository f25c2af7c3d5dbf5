// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Linux confinement.
//!
//! Filesystem access is limited to the certificate directory with Landlock, which needs no
//! privileges. When running as root the process also changes its root to the directory. System
//! calls are then limited with a seccomp allow-list; anything not on the list fails with
//! `EPERM`. `chroot`, `mkdir`, and every call that creates a socket are refused, so the changed
//! root can't be escaped and no new connections can be made.

use std::collections::BTreeMap;
use std::path::Path;

use landlock::{
    ABI, Access, AccessFs, PathBeneath, PathFd, RestrictionStatus, Ruleset, RulesetAttr,
    RulesetCreatedAttr, RulesetError, RulesetStatus,
};
use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};

/// The newest Landlock ABI the ruleset is written for. Kernels that support less enforce
/// what they can.
const LANDLOCK_ABI: ABI = ABI::V3;

/// System calls needed once confined: reading the channel, writing and publishing the files,
/// logging, and the runtime's own bookkeeping (memory, threads, polling, and timers).
const ALLOWED: &[libc::c_long] = &[
    libc::SYS_read,
    libc::SYS_readv,
    libc::SYS_pread64,
    libc::SYS_recvfrom,
    libc::SYS_recvmsg,
    libc::SYS_write,
    libc::SYS_writev,
    libc::SYS_pwrite64,
    libc::SYS_openat,
    libc::SYS_close,
    libc::SYS_fstat,
    libc::SYS_statx,
    libc::SYS_lseek,
    libc::SYS_fcntl,
    libc::SYS_fsync,
    libc::SYS_fdatasync,
    libc::SYS_renameat2,
    libc::SYS_fchmodat,
    libc::SYS_mmap,
    libc::SYS_munmap,
    libc::SYS_mremap,
    libc::SYS_mprotect,
    libc::SYS_madvise,
    libc::SYS_brk,
    libc::SYS_futex,
    libc::SYS_clone,
    libc::SYS_clone3,
    libc::SYS_set_robust_list,
    libc::SYS_rseq,
    libc::SYS_sigaltstack,
    libc::SYS_rt_sigaction,
    libc::SYS_rt_sigprocmask,
    libc::SYS_rt_sigreturn,
    libc::SYS_sched_yield,
    libc::SYS_sched_getaffinity,
    libc::SYS_getpid,
    libc::SYS_gettid,
    libc::SYS_tgkill,
    libc::SYS_prctl,
    libc::SYS_epoll_create1,
    libc::SYS_epoll_ctl,
    libc::SYS_epoll_pwait,
    libc::SYS_eventfd2,
    libc::SYS_ppoll,
    libc::SYS_clock_gettime,
    libc::SYS_clock_nanosleep,
    libc::SYS_nanosleep,
    libc::SYS_getrandom,
    libc::SYS_exit,
    libc::SYS_exit_group,
];

/// Calls that only exist in their legacy form on x86_64.
#[cfg(target_arch = "x86_64")]
const ALLOWED_LEGACY: &[libc::c_long] = &[
    libc::SYS_open,
    libc::SYS_stat,
    libc::SYS_lstat,
    libc::SYS_newfstatat,
    libc::SYS_rename,
    libc::SYS_renameat,
    libc::SYS_chmod,
    libc::SYS_poll,
    libc::SYS_epoll_wait,
];

#[cfg(not(target_arch = "x86_64"))]
const ALLOWED_LEGACY: &[libc::c_long] = &[];

pub(super) fn confine_filesystem(directory: &Path) -> std::io::Result<()> {
    rustix::thread::set_no_new_privs(true)?;
    // Landlock rules are attached to the directory itself, so grab it before the path stops
    // resolving.
    let beneath = PathFd::new(directory).map_err(std::io::Error::other)?;
    super::change_root(directory)?;

    let status = restrict_beneath(beneath).map_err(std::io::Error::other)?;
    if status.ruleset == RulesetStatus::NotEnforced {
        tracing::warn!(
            "Landlock is not supported by this kernel; filesystem access is not restricted by it"
        );
    } else {
        tracing::info!(
            directory = %directory.display(),
            status = ?status.ruleset,
            "Restricted filesystem access to the certificate directory"
        );
    }
    Ok(())
}

fn restrict_beneath(directory: PathFd) -> Result<RestrictionStatus, RulesetError> {
    let access = AccessFs::from_all(LANDLOCK_ABI);
    Ruleset::default()
        .handle_access(access)?
        .create()?
        .add_rule(PathBeneath::new(directory, access))?
        .restrict_self()
}

pub(super) fn confine_syscalls() -> std::io::Result<()> {
    let Some(program) = allow_list()? else {
        return Ok(());
    };
    // All threads, since the runtime may already have started its blocking pool.
    seccompiler::apply_filter_all_threads(&program).map_err(std::io::Error::other)?;
    tracing::info!(
        allowed = ALLOWED.len() + ALLOWED_LEGACY.len(),
        "Applied the system call allow-list"
    );
    Ok(())
}

/// Compile the allow-list for the running architecture, or `None` if seccompiler can't
/// target it.
fn allow_list() -> std::io::Result<Option<BpfProgram>> {
    let arch: Result<TargetArch, _> = std::env::consts::ARCH.try_into();
    let Ok(arch) = arch else {
        tracing::warn!(
            arch = std::env::consts::ARCH,
            "System call filtering is not available on this architecture: running without it"
        );
        return Ok(None);
    };

    let rules: BTreeMap<i64, Vec<SeccompRule>> = ALLOWED
        .iter()
        .chain(ALLOWED_LEGACY)
        .map(|&syscall| (i64::from(syscall), vec![]))
        .collect();
    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Errno(libc::EPERM as u32),
        SeccompAction::Allow,
        arch,
    )
    .map_err(std::io::Error::other)?;
    let program: BpfProgram = filter
        .try_into()
        .map_err(|error: seccompiler::BackendError| std::io::Error::other(error))?;

    Ok(Some(program))
}
