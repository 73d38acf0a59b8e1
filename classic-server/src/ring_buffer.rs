// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A mirrored ring buffer: a single backing allocation mapped twice
//! back-to-back in virtual memory, so a read or write that wraps past the
//! end of the buffer can still be addressed as one contiguous slice.
//!
//! Built the way the reference server builds it: `memfd_create` for an
//! anonymous, resizable backing object, then `mmap(MAP_FIXED | MAP_SHARED)`
//! over the same fd at consecutive addresses. Both mirrors point at the same
//! physical pages, so a write through one mirror is visible through the
//! other.

use std::io;
use std::os::fd::RawFd;

/// An mmap-backed ring buffer with a doubled virtual-address mirror.
///
/// `capacity` is always rounded up to a multiple of the page size, matching
/// the granularity `mmap` requires.
pub struct RingBuffer {
    base: *mut u8,
    capacity: usize,
    read_cursor: usize,
    write_cursor: usize,
}

// SAFETY: the mmap'd region is only ever accessed through `&self`/`&mut
// self`, so `RingBuffer` can move between threads as long as nothing aliases
// its pointer outside of this type. The server itself is single-threaded
// (see the engine's poll loop), so this is conservative rather than load
// bearing.
unsafe impl Send for RingBuffer {}

fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE never fails in practice on Linux.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_up_to_page(size: usize) -> usize {
    let page = page_size();
    (size + page - 1) / page * page
}

impl RingBuffer {
    /// Allocates a ring buffer of at least `requested_capacity` bytes.
    pub fn new(requested_capacity: usize) -> io::Result<Self> {
        let capacity = round_up_to_page(requested_capacity.max(1));

        // SAFETY: memfd_create with a literal name and no flags is always safe to call.
        let fd: RawFd = unsafe { libc::memfd_create(c"classic-server-ring".as_ptr(), 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd was just created above and is owned by this scope until closed.
        let truncate_result = unsafe { libc::ftruncate(fd, capacity as libc::off_t) };
        if truncate_result != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        // Reserve a contiguous region twice the capacity, then map the same
        // fd over each half with MAP_FIXED so both halves alias the same
        // physical pages.
        //
        // SAFETY: PROT_NONE reservation of anonymous memory with no fd.
        let reservation = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity * 2,
                libc::PROT_NONE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if reservation == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        for mirror in 0..2 {
            let addr = (reservation as usize + mirror * capacity) as *mut libc::c_void;
            // SAFETY: `addr` falls within the reservation just made, and
            // MAP_FIXED replaces that mapping in place with one backed by
            // `fd`, which has `capacity` valid bytes from the ftruncate above.
            let mapped = unsafe {
                libc::mmap(
                    addr,
                    capacity,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_FIXED | libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if mapped == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::munmap(reservation, capacity * 2);
                    libc::close(fd);
                }
                return Err(err);
            }
        }

        // SAFETY: fd is no longer needed once both mirrors are mapped — the
        // mappings keep the underlying pages alive.
        unsafe { libc::close(fd) };

        Ok(Self {
            base: reservation as *mut u8,
            capacity,
            read_cursor: 0,
            write_cursor: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently readable (written but not yet consumed).
    pub fn size(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    /// Bytes of free space available to write into before the buffer is full.
    pub fn space(&self) -> usize {
        self.capacity - self.size()
    }

    fn mask(&self, cursor: usize) -> usize {
        cursor % self.capacity
    }

    /// A contiguous slice of all currently readable bytes.
    ///
    /// Thanks to the mirror mapping this is always one slice, even when the
    /// logical read range wraps past the end of the backing allocation.
    pub fn read_slice(&self) -> &[u8] {
        let offset = self.mask(self.read_cursor);
        // SAFETY: `offset..offset + size()` lies within `[0, 2*capacity)`
        // because `size() <= capacity`, and every byte in that range is
        // backed by one of the two mirrored mappings.
        unsafe { std::slice::from_raw_parts(self.base.add(offset), self.size()) }
    }

    /// A contiguous, writable slice covering all currently free space.
    pub fn write_slice(&mut self) -> &mut [u8] {
        let offset = self.mask(self.write_cursor);
        let space = self.space();
        // SAFETY: same reasoning as `read_slice`, using the write cursor.
        unsafe { std::slice::from_raw_parts_mut(self.base.add(offset), space) }
    }

    /// Marks `n` bytes (previously returned by [`write_slice`]) as written
    /// and ready to read.
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(n <= self.space());
        self.write_cursor += n;
    }

    /// Marks `n` bytes (previously returned by [`read_slice`]) as consumed.
    pub fn commit_read(&mut self, n: usize) {
        debug_assert!(n <= self.size());
        self.read_cursor += n;
        // Cursors only need to stay within 2*capacity of each other to keep
        // `mask` correct; rebasing both when the buffer drains to empty
        // keeps them from growing without bound over a long-lived session.
        if self.read_cursor == self.write_cursor {
            self.read_cursor = 0;
            self.write_cursor = 0;
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: `base` was returned by the double mmap in `new` and has
        // never been unmapped since.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity * 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut rb = RingBuffer::new(4096).unwrap();
        let payload = b"hello classic protocol";
        rb.write_slice()[..payload.len()].copy_from_slice(payload);
        rb.commit_write(payload.len());

        assert_eq!(rb.size(), payload.len());
        assert_eq!(&rb.read_slice()[..payload.len()], payload);

        rb.commit_read(payload.len());
        assert_eq!(rb.size(), 0);
    }

    #[test]
    fn wraparound_is_contiguous() {
        let mut rb = RingBuffer::new(4096).unwrap();
        let capacity = rb.capacity();

        // Fill to near the end and drain all but a few bytes, so the read
        // and write cursors never become equal (which would rebase both to
        // zero) and the next write's tail genuinely lands past the physical
        // end of the backing allocation.
        let filler = vec![0xAAu8; capacity - 8];
        rb.write_slice()[..filler.len()].copy_from_slice(&filler);
        rb.commit_write(filler.len());
        rb.commit_read(filler.len() - 3);

        let payload = b"wraps across the boundary!!";
        assert!(payload.len() > 8, "test payload must straddle the wrap point");
        rb.write_slice()[..payload.len()].copy_from_slice(payload);
        rb.commit_write(payload.len());

        assert_eq!(&rb.read_slice()[3..3 + payload.len()], payload.as_slice());
    }

    #[test]
    fn capacity_rounds_up_to_page_size() {
        let rb = RingBuffer::new(1).unwrap();
        assert_eq!(rb.capacity(), page_size());
    }

    /// For a ring of capacity `S` mapped with mirror count `k = 2`, a byte
    /// written at raw offset `o` is visible at both `o` and `o + S` — the
    /// defining property of the mirrored mapping, checked directly against
    /// the backing memory rather than through the cursor-relative API.
    #[test]
    fn byte_written_at_offset_o_is_visible_at_o_plus_s() {
        let rb = RingBuffer::new(4096).unwrap();
        let capacity = rb.capacity();

        for &o in &[0usize, 1, capacity / 2, capacity - 1] {
            let value = (o % 256) as u8 ^ 0x5A;
            // SAFETY: both offsets fall within the two mirrored mappings
            // spanning `[0, 2*capacity)` established in `RingBuffer::new`.
            unsafe {
                std::ptr::write(rb.base.add(o), value);
                assert_eq!(std::ptr::read(rb.base.add(o + capacity)), value, "offset {o} not mirrored");
            }
        }
    }
}
