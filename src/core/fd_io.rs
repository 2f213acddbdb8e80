//! Loop-until-done write helper for a raw POSIX fd (the PTY master), shared
//! by [`super::input_record`] and [`super::pump`]. Grounded on `write_exact`
//! in `helpers.cpp`.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::unistd::write;

/// Writes the whole buffer to `fd`, looping past short writes. A `write`
/// returning 0 or an error is treated as failure -- the caller decides
/// whether that's tolerated or fatal.
pub fn write_all_fd(fd: RawFd, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        let written = write(fd, buf)?;
        if written == 0 {
            return Err(Errno::EIO);
        }
        buf = &buf[written..];
    }
    Ok(())
}
