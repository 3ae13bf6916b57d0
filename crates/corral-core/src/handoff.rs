//! One-shot hand-off channel between the launcher and a container init.
//!
//! The launcher creates the container process before the process knows
//! what to run. Once resources are attached, the launcher sends the
//! command line over this channel and closes it. The init blocks reading
//! until end-of-stream, so a command is only ever observed complete, and
//! a launcher that dies before sending leaves the init with an empty read
//! instead of a hang.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use corral_common::constants::INIT_PIPE_FD;
use corral_common::error::{CorralError, Result};

/// Write end, held by the launcher. Consumed by [`InitSender::send`].
#[derive(Debug)]
pub struct InitSender {
    file: File,
}

/// Read end, inherited by the container init.
#[derive(Debug)]
pub struct InitReceiver {
    file: File,
}

/// Creates a connected sender/receiver pair.
///
/// Both ends are close-on-exec; the launcher arranges for the receiver to
/// survive into the init (see [`InitReceiver::as_raw_fd`]).
///
/// # Errors
///
/// Returns an error if the pipe cannot be created.
#[cfg(target_os = "linux")]
pub fn channel() -> Result<(InitSender, InitReceiver)> {
    use nix::fcntl::OFlag;

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|e| CorralError::process(format!("create init pipe: {e}")))?;
    Ok((
        InitSender {
            file: File::from(write),
        },
        InitReceiver {
            file: File::from(read),
        },
    ))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error; container launch requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn channel() -> Result<(InitSender, InitReceiver)> {
    Err(crate::linux_required())
}

impl InitSender {
    /// Writes the whole command and closes the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, for example because the
    /// receiving process already exited.
    pub fn send(mut self, command: &str) -> Result<()> {
        self.file
            .write_all(command.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| CorralError::process(format!("send command to container init: {e}")))?;
        tracing::debug!(bytes = command.len(), "command handed to container init");
        Ok(())
    }
}

impl InitReceiver {
    /// Takes ownership of the receiver inherited at [`INIT_PIPE_FD`].
    ///
    /// # Errors
    ///
    /// Returns an error if that descriptor is not open.
    pub fn inherited() -> Result<Self> {
        // SAFETY: F_GETFD only inspects the descriptor table.
        let flags = unsafe { libc::fcntl(INIT_PIPE_FD, libc::F_GETFD) };
        if flags < 0 {
            return Err(CorralError::process(format!(
                "init pipe fd {INIT_PIPE_FD} is not open; init must be started by the runtime"
            )));
        }
        // SAFETY: the descriptor is open and nothing else in this process
        // owns it; the launcher placed it there for exactly this purpose.
        let fd = unsafe { OwnedFd::from_raw_fd(INIT_PIPE_FD) };
        Ok(Self {
            file: File::from(fd),
        })
    }

    /// Blocks until the sender closes the channel and returns everything
    /// written to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the data is not UTF-8.
    pub fn recv(mut self) -> Result<String> {
        let mut command = String::new();
        let _ = self
            .file
            .read_to_string(&mut command)
            .map_err(|e| CorralError::process(format!("read command from init pipe: {e}")))?;
        Ok(command)
    }

    /// Raw descriptor, for launchers that place it in a child process.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<InitReceiver> for OwnedFd {
    fn from(receiver: InitReceiver) -> Self {
        Self::from(receiver.file)
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn command_is_received_after_close() {
        let (tx, rx) = channel().expect("channel");
        let reader = std::thread::spawn(move || rx.recv().expect("recv"));
        tx.send("sh -c 'echo hi'").expect("send");
        assert_eq!(reader.join().expect("join"), "sh -c 'echo hi'");
    }

    #[test]
    fn dropped_sender_yields_empty_command() {
        let (tx, rx) = channel().expect("channel");
        drop(tx);
        assert_eq!(rx.recv().expect("recv"), "");
    }

    #[test]
    fn send_to_closed_receiver_fails() {
        let (tx, rx) = channel().expect("channel");
        drop(rx);
        assert!(tx.send("true").is_err());
    }

    #[test]
    fn receiver_works_as_child_stdin() {
        let (tx, rx) = channel().expect("channel");
        let child = std::process::Command::new("cat")
            .stdin(std::process::Stdio::from(OwnedFd::from(rx)))
            .stdout(std::process::Stdio::piped())
            .spawn()
            .expect("spawn cat");
        tx.send("hello").expect("send");
        let out = child.wait_with_output().expect("wait");
        assert_eq!(out.stdout, b"hello");
    }
}
