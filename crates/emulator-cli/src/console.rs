//! Host console adapter: non-blocking stdin polling, byte-wise stdout.

use std::io::{self, Read, Write};
use std::os::fd::AsFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use pv32_core::Console;

/// Console over the process's standard streams. Input is polled with a
/// zero timeout, so the emulated tick never stalls on the host terminal.
#[derive(Debug, Default)]
pub struct StdioConsole;

impl StdioConsole {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Console for StdioConsole {
    fn poll_byte(&mut self) -> Option<u8> {
        let stdin = io::stdin();
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) if n > 0 => {
                let mut buf = [0u8; 1];
                match stdin.lock().read(&mut buf) {
                    Ok(1) => Some(buf[0]),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn write_byte(&mut self, byte: u8) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(&[byte]);
        let _ = stdout.flush();
    }
}
