use core::ptr::{self, NonNull};

/// File descriptor for standard input.
pub const STDIN: i32 = 0;

/// File descriptor for standard output.
pub const STDOUT: i32 = 1;

/// Maps an anonymous, process-private, non-executable region of memory.
///
/// # Arguments
///
/// * `length` - The size of the region to map, in bytes.
///
/// # Returns
///
/// * A pointer to the mapped region, or `None` if the kernel refused the mapping.
pub fn map_region(length: usize) -> Option<NonNull<u8>> {
    let address = unsafe {
        libc::mmap(
            ptr::null_mut(),
            length,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if address == libc::MAP_FAILED {
        return None;
    }

    NonNull::new(address.cast::<u8>())
}

/// Unmaps a region previously obtained from [`map_region`].
///
/// # Arguments
///
/// * `address` - The base address of the region.
/// * `length` - The size of the region, in bytes.
pub fn unmap_region(address: *mut u8, length: usize) {
    unsafe {
        libc::munmap(address.cast(), length);
    }
}

/// Fills the given buffer with bytes from the kernel randomness source.
///
/// The call is never retried. Callers decide whether a shortfall matters;
/// placement randomization treats it as a soft failure, page scrambling
/// ignores it entirely.
///
/// # Arguments
///
/// * `buffer` - The buffer to fill.
///
/// # Returns
///
/// * The number of bytes actually delivered, which may be less than requested.
pub fn fill_random(buffer: &mut [u8]) -> usize {
    let produced = unsafe { libc::getrandom(buffer.as_mut_ptr().cast(), buffer.len(), 0) };
    if produced < 0 { 0 } else { produced as usize }
}

/// Writes the entire buffer to the given file descriptor.
///
/// Partial writes are restarted with the remaining slice until the buffer
/// is fully sent or the descriptor reports an error.
///
/// # Arguments
///
/// * `fd` - The descriptor to write to.
/// * `buffer` - The bytes to send.
///
/// # Returns
///
/// * `true` once every byte has been written, `false` on the first error.
pub fn write_all(fd: i32, buffer: &[u8]) -> bool {
    let mut consumed = 0;

    while consumed < buffer.len() {
        let remaining = &buffer[consumed..];
        let sent = unsafe { libc::write(fd, remaining.as_ptr().cast(), remaining.len()) };
        if sent <= 0 {
            return false;
        }

        consumed += sent as usize;
    }

    true
}

/// Reads one line from the given file descriptor.
///
/// Bytes are consumed until a newline arrives, the descriptor reaches end
/// of input, or the buffer is full. The newline itself is not stored. A
/// failed read is treated as end of input, never retried.
///
/// # Arguments
///
/// * `fd` - The descriptor to read from.
/// * `buffer` - Receives the line, capped at `buffer.len()` bytes.
///
/// # Returns
///
/// * The number of bytes stored in `buffer`.
pub fn read_line(fd: i32, buffer: &mut [u8]) -> usize {
    let mut filled = 0;

    while filled < buffer.len() {
        let chunk = &mut buffer[filled..];
        let got = unsafe { libc::read(fd, chunk.as_mut_ptr().cast(), chunk.len()) };
        if got <= 0 {
            break;
        }

        let got = got as usize;
        if let Some(position) = memchr::memchr(b'\n', &buffer[filled..filled + got]) {
            return filled + position;
        }

        filled += got;
    }

    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (i32, i32) {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn write_all_then_read_line_strips_newline() {
        let (rx, tx) = pipe_pair();
        assert!(write_all(tx, b"open sesame\nextra"));
        unsafe { libc::close(tx) };

        let mut buffer = [0u8; 64];
        let got = read_line(rx, &mut buffer);
        assert_eq!(&buffer[..got], b"open sesame");
        unsafe { libc::close(rx) };
    }

    #[test]
    fn read_line_stops_at_end_of_input() {
        let (rx, tx) = pipe_pair();
        assert!(write_all(tx, b"no terminator"));
        unsafe { libc::close(tx) };

        let mut buffer = [0u8; 64];
        let got = read_line(rx, &mut buffer);
        assert_eq!(&buffer[..got], b"no terminator");
        unsafe { libc::close(rx) };
    }

    #[test]
    fn read_line_respects_the_buffer_cap() {
        let (rx, tx) = pipe_pair();
        assert!(write_all(tx, b"abcdefgh\n"));
        unsafe { libc::close(tx) };

        let mut buffer = [0u8; 4];
        let got = read_line(rx, &mut buffer);
        assert_eq!(&buffer[..got], b"abcd");
        unsafe { libc::close(rx) };
    }

    #[test]
    fn fill_random_delivers_requested_bytes() {
        let mut buffer = [0u8; 32];
        assert_eq!(fill_random(&mut buffer), buffer.len());
    }

    #[test]
    fn map_and_unmap_round_trip() {
        let region = map_region(4096).expect("mapping refused");
        unsafe { region.as_ptr().write_bytes(0xAB, 4096) };
        unmap_region(region.as_ptr(), 4096);
    }
}
