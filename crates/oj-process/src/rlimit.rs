//! POSIX `setrlimit` enforcement for the compile phase.
//!
//! [`apply_address_space_limit`] sets `RLIMIT_AS` on the **current
//! process** and is intended to run in a child after fork, via
//! `Command::pre_exec`; [`limit_address_space`] wires it onto a command.
//! The run phase does not use this: there the sandbox enforces memory
//! through its own cgroup.

use tokio::process::Command;

/// Apply `RLIMIT_AS` (virtual address-space size, in bytes) to the
/// current process.
///
/// # Safety note
/// `setrlimit` is async-signal-safe on Linux, making this suitable for
/// use inside a `pre_exec` closure.
pub fn apply_address_space_limit(bytes: u64) -> std::io::Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: bytes as libc::rlim_t,
        rlim_max: bytes as libc::rlim_t,
    };

    // SAFETY: setrlimit is a well-defined POSIX syscall; we pass a valid
    // rlimit struct for RLIMIT_AS.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Arrange for the child spawned from `cmd` to run under an
/// address-space rlimit.
pub fn limit_address_space(cmd: &mut Command, bytes: u64) {
    // SAFETY: the closure only calls setrlimit, which is
    // async-signal-safe, between fork and exec.
    unsafe {
        cmd.pre_exec(move || apply_address_space_limit(bytes));
    }
}
