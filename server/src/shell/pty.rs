//! PTY allocation, shell spawning, and terminal resize.
//!
//! Uses the `nix` crate for the POSIX PTY APIs. The master fd stays with the
//! backend for the whole session; the reader and the stdin writer each work
//! on their own duplicate of it.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::process::Stdio;

use nix::pty::{openpty, OpenptyResult, Winsize};
use tokio::process::{Child, Command};

use crate::backend::TermSize;

/// An allocated PTY pair (master + slave).
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

fn winsize(size: TermSize) -> Winsize {
    Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Allocate a PTY pair with the given terminal size.
pub fn allocate_pty(size: TermSize) -> Result<PtyPair, nix::Error> {
    let OpenptyResult { master, slave } = openpty(&winsize(size), None)?;
    Ok(PtyPair { master, slave })
}

/// Duplicate the master fd as an async file handle.
pub fn clone_master(master: &OwnedFd) -> std::io::Result<tokio::fs::File> {
    let fd = master.try_clone()?;
    Ok(tokio::fs::File::from_std(std::fs::File::from(fd)))
}

/// Spawn `shell` as a login shell on the slave side of the PTY.
///
/// The child becomes a session leader with the slave as its controlling
/// terminal, so its pid doubles as the process group id.
pub fn spawn_shell_pty(
    slave: &OwnedFd,
    shell: &str,
    working_dir: &str,
    env: &HashMap<String, String>,
) -> std::io::Result<Child> {
    let slave_fd = slave.as_raw_fd();
    let mut cmd = Command::new(shell);
    cmd.arg("-l")
        .current_dir(working_dir)
        .env("TERM", "xterm-256color")
        .envs(env)
        .kill_on_drop(true);

    // stdio is wired to the slave in pre_exec.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::ioctl(slave_fd, libc::TIOCSCTTY, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            for target in 0..=2 {
                if libc::dup2(slave_fd, target) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if slave_fd > 2 {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    cmd.spawn()
}

/// Apply a new window size to the PTY.
pub fn resize_pty(master: &OwnedFd, size: TermSize) -> Result<(), nix::Error> {
    let ws = winsize(size);
    // SAFETY: TIOCSWINSZ reads a Winsize struct that outlives the call.
    let ret = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, std::ptr::addr_of!(ws)) };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(())
    }
}

/// Read the PTY's current window size.
pub fn pty_size(master: &OwnedFd) -> Result<TermSize, nix::Error> {
    let mut ws = winsize(TermSize::new(0, 0));
    // SAFETY: TIOCGWINSZ writes into the Winsize struct we own.
    let ret = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCGWINSZ, std::ptr::addr_of_mut!(ws)) };
    if ret == -1 {
        Err(nix::Error::last())
    } else {
        Ok(TermSize::new(ws.ws_col, ws.ws_row))
    }
}
