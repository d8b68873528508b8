//! Retry of interrupted system calls.
//!
//! Device requests and readiness waits can be cut short by a signal. Those
//! calls are reissued here; every other outcome is returned to the caller.

use std::io;

use log::trace;

/// Run `op` until it succeeds or fails with an error that `interrupted`
/// does not accept.
pub fn retry_while<T, E, F, P>(mut op: F, mut interrupted: P) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    P: FnMut(&E) -> bool,
{
    loop {
        match op() {
            Err(err) if interrupted(&err) => {
                trace!("system call interrupted, retrying");
            }
            other => return other,
        }
    }
}

/// Run `op`, reissuing it for as long as it fails with EINTR.
pub fn retry_interrupted<T, F>(op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    retry_while(op, |err| err.kind() == io::ErrorKind::Interrupted)
}
