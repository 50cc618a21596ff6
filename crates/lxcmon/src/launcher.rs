//! Spawning the monitor daemon.
//!
//! `ensure_running` is synchronous from the caller's point of view: it
//! returns once a monitord for the group has bound its socket (or once a
//! freshly spawned one found another monitord already owning the address).
//! The daemon is started through a double fork so it is neither a child the
//! caller has to reap nor tied to the caller's session:
//!
//! ```text
//! caller ──fork──▶ intermediate ──fork──▶ daemon (setsid, stdio → /dev/null, exec)
//!   │                   │                    │
//!   │ waitpid           │ read(pipe) ◀───────┘ write/close READY_FD once bound
//!   │                   ▼
//!   └──────────◀── _exit(0)
//! ```
//!
//! Between `fork()` and `exec()`/`_exit()` only raw system calls run: the
//! argument and environment arrays are built before the first fork, and
//! nothing is logged in the children. The handshake pipe is created by the
//! intermediate process, so a launch running on another thread of the
//! caller can never inherit its write end and keep the handshake open.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::ffi::{c_char, CString, OsStr, OsString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;

use lxcmon_core::RUNTIME_DIR_ENV;
use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, fork, pipe2, setsid, ForkResult, Pid};
use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};

/// Written by the daemon child when `exec` fails, so the launcher can tell
/// a missing daemon from one that started and closed the pipe.
const EXEC_FAILED: u8 = b'!';

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;

/// Room for a descriptor number in decimal plus its NUL.
const FD_ARG_LEN: usize = 12;

/// Starts monitord instances on demand.
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    /// Daemon executable (looked up in `PATH` when it has no slash).
    program: PathBuf,

    /// Runtime root exported to the daemon, if the caller overrides it.
    runtime_dir: Option<PathBuf>,

    /// Extra variables set in the daemon's environment.
    envs: Vec<(OsString, OsString)>,
}

impl DaemonLauncher {
    /// Creates a launcher for the given daemon executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            runtime_dir: None,
            envs: Vec::new(),
        }
    }

    /// Creates a launcher from the client configuration.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            program: config.monitord_path.clone(),
            runtime_dir: config.runtime_dir.clone(),
            envs: Vec::new(),
        }
    }

    /// Exports `dir` to spawned daemons as their runtime root.
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Sets an environment variable for spawned daemons.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Ensures a monitord is serving `group`.
    ///
    /// Always spawns; a daemon that finds the group's address already bound
    /// completes the handshake and exits, leaving the existing one in
    /// charge. Blocks until the handshake completes (there is no timeout).
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SpawnFailed`] if a fork fails, the daemon
    /// cannot be executed, or the intermediate process fails.
    pub fn ensure_running(&self, group: &str) -> Result<()> {
        let image = ExecImage::new(&self.program, group, self.child_env()?)?;

        debug!(program = %self.program.display(), group, "Spawning monitord");

        // SAFETY: the child branches below only issue system calls (pipe2,
        // fork, read, setsid, dup2, fcntl, execvpe, _exit) on memory laid
        // out before this point. They never allocate, lock or log, so
        // inheriting another thread's held locks cannot deadlock them.
        match unsafe { fork() } {
            Err(e) => Err(MonitorError::SpawnFailed(format!("Failed to fork(): {e}"))),
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), "Going to wait for intermediate process");
                match wait_for(child)? {
                    WaitStatus::Exited(_, EXIT_SUCCESS) => {
                        debug!(pid = child.as_raw(), "Successfully synced with monitord");
                        Ok(())
                    }
                    status => Err(MonitorError::SpawnFailed(format!(
                        "Intermediate process ended with {status:?}"
                    ))),
                }
            }
            Ok(ForkResult::Child) => run_intermediate(&image),
        }
    }

    /// Environment handed to the daemon: ours, plus the overrides.
    fn child_env(&self) -> Result<Vec<CString>> {
        let mut overrides: Vec<(OsString, OsString)> = Vec::new();
        if let Some(dir) = &self.runtime_dir {
            overrides.push((RUNTIME_DIR_ENV.into(), dir.clone().into_os_string()));
        }
        overrides.extend(self.envs.iter().cloned());

        let mut envp = Vec::new();
        for (key, value) in std::env::vars_os() {
            if overrides.iter().any(|(k, _)| *k == key) {
                continue;
            }
            // Entries with interior NULs cannot be passed to exec.
            if let Ok(entry) = env_entry(key, value) {
                envp.push(entry);
            }
        }
        for (key, value) in overrides {
            envp.push(env_entry(key, value)?);
        }

        Ok(envp)
    }
}

fn env_entry(key: OsString, value: OsString) -> Result<CString> {
    let mut entry = key.into_vec();
    entry.push(b'=');
    entry.extend(value.into_vec());
    to_cstring(&entry)
}

/// Program, `argv` and `envp` for the daemon, ready for `execvpe`.
///
/// The third argument (the ready descriptor) is a preallocated slot filled
/// in by the intermediate process once it has created the pipe.
struct ExecImage {
    program: CString,
    _group: CString,
    _env: Vec<CString>,
    _fd_arg_buf: Vec<u8>,
    fd_arg: *mut u8,
    argv: Vec<*const c_char>,
    envp: Vec<*const c_char>,
}

impl ExecImage {
    fn new(program: &Path, group: &str, env: Vec<CString>) -> Result<Self> {
        let program = to_cstring(program.as_os_str().as_bytes())?;
        let group = to_cstring(group.as_bytes())?;

        let mut fd_arg_buf = vec![0u8; FD_ARG_LEN];
        let fd_arg = fd_arg_buf.as_mut_ptr();

        let argv = vec![
            program.as_ptr(),
            group.as_ptr(),
            fd_arg.cast_const().cast::<c_char>(),
            ptr::null(),
        ];
        let envp = env
            .iter()
            .map(|entry| entry.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();

        Ok(Self {
            program,
            _group: group,
            _env: env,
            _fd_arg_buf: fd_arg_buf,
            fd_arg,
            argv,
            envp,
        })
    }

    /// Stores `fd` as the daemon's ready descriptor argument.
    fn set_ready_fd(&self, fd: RawFd) -> bool {
        // SAFETY: `fd_arg` points at the FD_ARG_LEN bytes owned by
        // `_fd_arg_buf`, which lives as long as `self` and is only reached
        // through this pointer.
        let slot = unsafe { std::slice::from_raw_parts_mut(self.fd_arg, FD_ARG_LEN) };
        format_fd(slot, fd)
    }

    /// Replaces the process image; returns only if `execvpe` failed.
    fn exec(&self) {
        // SAFETY: `argv` and `envp` are null-terminated arrays of pointers
        // to NUL-terminated strings owned by `self`.
        unsafe {
            libc::execvpe(self.program.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr());
        }
    }
}

/// Writes `fd` in decimal followed by a NUL into `slot` without allocating.
fn format_fd(slot: &mut [u8], fd: RawFd) -> bool {
    let Ok(mut n) = u32::try_from(fd) else {
        return false;
    };

    let mut digits = [0u8; 10];
    let mut len = 0;
    loop {
        let Some(digit) = digits.get_mut(len) else {
            return false;
        };
        // n % 10 < 10
        *digit = b'0' + (n % 10) as u8;
        len += 1;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    if len >= slot.len() {
        return false;
    }
    for (dst, src) in slot.iter_mut().zip(digits.iter().take(len).rev()) {
        *dst = *src;
    }
    for rest in slot.iter_mut().skip(len) {
        *rest = 0;
    }
    true
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes)
        .map_err(|e| MonitorError::SpawnFailed(format!("Argument contains a NUL byte: {e}")))
}

fn wait_for(child: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(MonitorError::SpawnFailed(format!(
                    "Failed to wait for pid {child}: {e}"
                )))
            }
            Ok(status) => return Ok(status),
        }
    }
}

// ============================================================================
// Forked children (no allocation, no logging below this line)
// ============================================================================

/// Terminates a forked child without running atexit handlers or
/// flushing stdio buffers inherited from the caller.
fn exit_child(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

fn run_intermediate(image: &ExecImage) -> ! {
    // Created here rather than in the caller: only this process and the
    // daemon ever hold the write end.
    let Ok((read_end, write_end)) = pipe2(OFlag::O_CLOEXEC) else {
        exit_child(EXIT_FAILURE)
    };
    if !image.set_ready_fd(write_end.as_raw_fd()) {
        exit_child(EXIT_FAILURE);
    }

    // SAFETY: same constraints as the first fork; the grandchild goes
    // straight to exec.
    match unsafe { fork() } {
        Err(_) => exit_child(EXIT_FAILURE),
        Ok(ForkResult::Child) => run_daemon(read_end, write_end, image),
        Ok(ForkResult::Parent { .. }) => {
            drop(write_end);

            let mut ready = File::from(read_end);
            let mut byte = [0u8; 1];
            // A byte or EOF both end the handshake.
            let got = loop {
                match ready.read(&mut byte) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other,
                }
            };
            drop(ready);

            match got {
                Ok(1) if byte == [EXEC_FAILED] => exit_child(EXIT_FAILURE),
                _ => exit_child(EXIT_SUCCESS),
            }
        }
    }
}

fn run_daemon(read_end: OwnedFd, write_end: OwnedFd, image: &ExecImage) -> ! {
    if setsid().is_err() {
        exit_child(EXIT_FAILURE);
    }
    if null_stdfds().is_err() {
        exit_child(EXIT_FAILURE);
    }
    drop(read_end);

    // The write end must survive exec; it was created close-on-exec.
    if fcntl(write_end.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::empty())).is_err() {
        exit_child(EXIT_FAILURE);
    }

    image.exec();

    let mut ready = File::from(write_end);
    let _ = ready.write(&[EXEC_FAILED]);
    exit_child(EXIT_FAILURE)
}

/// Points stdin, stdout and stderr at `/dev/null`.
fn null_stdfds() -> nix::Result<()> {
    let null = open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
    for target in 0..=2 {
        dup2(null, target)?;
    }
    if null > 2 {
        close(null)?;
    }
    Ok(())
}
