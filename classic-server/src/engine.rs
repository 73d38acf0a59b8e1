// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The completion-based I/O engine: owns the io_uring instance, the
//! listening socket, and every session's state, and drives everything
//! through a single submit/complete loop.
//!
//! There is exactly one suspension point in this engine: the call to
//! `submit_and_wait` inside [`Engine::poll`]. Everything else runs to
//! completion without blocking, matching the single-threaded, lock-free
//! model the reference server uses.

use std::io;
use std::net::{IpAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU16, Ordering};

use io_uring::{cqueue, opcode, types, IoUring};

use crate::dispatch::{self, WorldHook};
use crate::error::{Error, Result};
use crate::frame::{Frame, TracedFrame};
use crate::pool::Pool;
use crate::ring_buffer::RingBuffer;
use crate::session::{SessionId, SessionTable};

const RECV_GROUP_ID: u16 = 1;
const RECV_BUF_SIZE: u32 = 4096;
const SESSION_RING_BUFFER_SIZE: usize = 128 * 1024;

/// Construction-time sizing for an [`Engine`].
#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub max_connections: usize,
    pub queue_depth: u32,
    pub frame_pool_size: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            queue_depth: 256,
            frame_pool_size: 1024 * 32,
        }
    }
}

pub struct Engine {
    ring: IoUring,
    listener: TcpListener,
    sessions: SessionTable,
    send_budget: Pool<()>,
    recv_buffers: BufferRing,
    trace_counter: u64,
}

impl Engine {
    /// Creates the engine's io_uring instance, registers its shared receive
    /// buffer ring, and builds the session table, but does not yet bind a
    /// listening socket — see [`Engine::listen`].
    pub fn create(params: Params) -> Result<Self> {
        let mut ring = IoUring::new(params.queue_depth.max(8))?;
        let sessions = SessionTable::with_capacity(params.max_connections);
        let send_budget = Pool::with_capacity(params.frame_pool_size);
        let recv_buffers = BufferRing::new(&mut ring, buf_ring_entries(params.max_connections), RECV_BUF_SIZE, RECV_GROUP_ID)?;

        // A placeholder listener; replaced by `listen`. Binding to port 0 on
        // the loopback address never fails and is immediately rebound.
        let listener = TcpListener::bind("127.0.0.1:0")?;

        Ok(Self {
            ring,
            listener,
            sessions,
            send_budget,
            recv_buffers,
            trace_counter: 0,
        })
    }

    /// Hands out this engine's next trace id, scoped to this instance rather
    /// than a process-wide global — two engines in the same process (as in
    /// tests) never share or race over trace ids.
    fn next_trace(&mut self) -> u64 {
        let trace = self.trace_counter;
        self.trace_counter += 1;
        trace
    }

    /// Binds the listening socket to `port` on all interfaces and submits
    /// the long-lived multishot accept operation.
    pub fn listen(&mut self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(Error::Listen)?;
        self.listener = listener;
        self.submit_accept();
        Ok(())
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    fn submit_accept(&mut self) {
        let trace = self.next_trace();
        let frame = TracedFrame::new(trace, Frame::Accept);
        let listen_fd = types::Fd(self.listener.as_raw_fd());
        let sqe = opcode::AcceptMulti::new(listen_fd).build().user_data(frame.into_user_data());
        // SAFETY: the listener outlives the accept operation for the life of
        // the engine, and the user_data pointer was just leaked above.
        unsafe {
            self.ring.submission().push(&sqe).expect("submission queue is full");
        }
    }

    fn submit_recv(&mut self, fd: i32, session: SessionId) {
        let trace = self.next_trace();
        let frame = TracedFrame::new(trace, Frame::Recv { session });
        let sqe = opcode::RecvMulti::new(types::Fd(fd), RECV_GROUP_ID)
            .build()
            .user_data(frame.into_user_data());
        // SAFETY: `fd` is kept open for as long as this multishot receive is
        // live; it is only closed after queuing a matching close frame.
        unsafe {
            self.ring.submission().push(&sqe).expect("submission queue is full");
        }
    }

    /// Queues (the remainder of) `data` for `session`, starting at `offset`.
    fn queue_send(&mut self, session: SessionId, data: Vec<u8>, offset: usize) {
        let Some(budget) = self.send_budget.alloc(()) else {
            log::error!(target: "classic_server", "send frame pool exhausted; dropping reply to session {}", session.0);
            return;
        };
        let Some(s) = self.sessions.get(session) else {
            // Session closed out from under us (the frame<->session race
            // §9 flags); release the budget slot we just took instead of
            // leaking it.
            self.send_budget.free(budget);
            return;
        };
        let fd = s.fd;

        let trace = self.next_trace();
        let frame = TracedFrame::new(trace, Frame::Send {
            session,
            data,
            offset,
            budget,
        });
        let (ptr, len) = match &frame.frame {
            Frame::Send { data, offset, .. } => (unsafe { data.as_ptr().add(*offset) }, (data.len() - *offset) as u32),
            _ => unreachable!(),
        };
        let sqe = opcode::Send::new(types::Fd(fd), ptr, len).build().user_data(frame.into_user_data());
        // SAFETY: `data` is owned by the frame leaked into `user_data`, so it
        // stays alive until the completion reconstructs and drops it.
        unsafe {
            self.ring.submission().push(&sqe).expect("submission queue is full");
        }
    }

    fn queue_close(&mut self, session: SessionId) {
        let Some(s) = self.sessions.get(session) else { return };
        let fd = s.fd;
        let trace = self.next_trace();
        let frame = TracedFrame::new(trace, Frame::Close { session });
        let sqe = opcode::Close::new(types::Fd(fd)).build().user_data(frame.into_user_data());
        // SAFETY: `fd` remains valid (not yet closed) until this completes.
        unsafe {
            self.ring.submission().push(&sqe).expect("submission queue is full");
        }
    }

    /// Submits any queued SQEs and blocks until at least one completion is
    /// ready, then drains and handles every completion currently available.
    ///
    /// This is the engine's only suspension point.
    pub fn poll(&mut self, hook: &mut dyn WorldHook) {
        if let Err(e) = self.ring.submit_and_wait(1) {
            match nix::errno::Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
                nix::Error::EAGAIN | nix::Error::EINTR => {}
                other => panic!("unexpected error from io_uring_enter: {other}"),
            }
        }

        let completions: Vec<cqueue::Entry> = self.ring.completion().collect();
        for cqe in completions {
            self.handle_completion(cqe, hook);
        }
    }

    fn handle_completion(&mut self, cqe: cqueue::Entry, hook: &mut dyn WorldHook) {
        // SAFETY: user_data was produced by `TracedFrame::into_user_data` or
        // `relinquish` on a frame that has not yet been reconstructed.
        let traced = unsafe { TracedFrame::from_user_data(cqe.user_data()) };
        log::trace!(target: "classic_server", "completion for {} (trace {}): result {}", traced.frame, traced.trace, cqe.result());

        match traced.frame {
            Frame::Accept => self.handle_accept(&cqe, traced),
            Frame::Recv { session } => self.handle_recv(&cqe, session, traced, hook),
            Frame::Send { .. } => self.handle_send(&cqe, traced),
            Frame::Close { session } => self.handle_close(&cqe, session),
        }
    }

    fn handle_accept(&mut self, cqe: &cqueue::Entry, traced: Box<TracedFrame>) {
        let result = cqe.result();
        if result >= 0 {
            let fd = result;
            let (address, port) = peer_address(fd).unwrap_or((IpAddr::from([0, 0, 0, 0]), 0));
            match RingBuffer::new(SESSION_RING_BUFFER_SIZE) {
                Ok(ring_buffer) => match self.sessions.insert(fd, address, port, ring_buffer) {
                    Some(session) => self.submit_recv(fd, session),
                    None => {
                        log::warn!(target: "classic_server", "max_connections reached; refusing new connection");
                        unsafe { libc::close(fd) };
                    }
                },
                Err(e) => {
                    log::error!(target: "classic_server", "failed to allocate session ring buffer: {e}");
                    unsafe { libc::close(fd) };
                }
            }
        } else {
            log::warn!(target: "classic_server", "accept failed: {}", io::Error::from_raw_os_error(-result));
        }

        self.resubmit_accept_if_needed(cqe, traced);
    }

    fn resubmit_accept_if_needed(&mut self, cqe: &cqueue::Entry, traced: Box<TracedFrame>) {
        if cqueue::more(cqe.flags()) {
            // The kernel keeps this submission (and its user_data) alive;
            // hand the frame back rather than dropping it.
            let _ = traced.relinquish();
        } else {
            log::warn!(target: "classic_server", "multishot accept did not set MORE; resubmitting");
            self.submit_accept();
        }
    }

    fn handle_recv(&mut self, cqe: &cqueue::Entry, session: SessionId, traced: Box<TracedFrame>, hook: &mut dyn WorldHook) {
        let result = cqe.result();

        if result < 0 {
            log::warn!(target: "classic_server", "recv error on session {}: {}", session.0, io::Error::from_raw_os_error(-result));
            self.queue_close(session);
        } else if result == 0 {
            log::debug!(target: "classic_server", "session {} closed by peer", session.0);
            self.queue_close(session);
        } else {
            let amount = result as usize;
            let buffer_id = cqueue::buffer_select(cqe.flags()).expect("multishot recv always selects a buffer");
            self.handle_received_bytes(session, buffer_id, amount, hook);
        }

        if cqueue::more(cqe.flags()) {
            let _ = traced.relinquish();
        } else {
            log::debug!(target: "classic_server", "multishot recv ended for session {}", session.0);
        }
    }

    fn handle_received_bytes(&mut self, session: SessionId, buffer_id: u16, amount: usize, hook: &mut dyn WorldHook) {
        // SAFETY: `buffer_id` was just reported by a completion for a
        // buffer that has not been resubmitted since.
        let buf = unsafe { self.recv_buffers.take_buf(buffer_id) };
        let bytes = &buf[..amount];

        // Computed while `s` is borrowed, then acted on once that borrow
        // ends, since acting on it (queuing sends/closes) needs `&mut self`.
        enum Action {
            None,
            Close,
            Reply { replies: Vec<Vec<u8>>, close: bool },
        }

        let action = if let Some(s) = self.sessions.get_mut(session) {
            if s.inbound.space() < bytes.len() {
                Action::Close
            } else {
                s.inbound.write_slice()[..bytes.len()].copy_from_slice(bytes);
                s.inbound.commit_write(bytes.len());
                s.total_bytes_in += bytes.len() as u64;

                let readable = s.inbound.read_slice().to_vec();
                let outcome = dispatch::process_inbound(s, &readable, hook);
                s.inbound.commit_read(outcome.consumed);
                Action::Reply {
                    replies: outcome.responses,
                    close: outcome.close,
                }
            }
        } else {
            Action::None
        };

        match action {
            Action::None => {}
            Action::Close => {
                log::warn!(target: "classic_server", "session {} inbound buffer full; closing", session.0);
                self.queue_close(session);
            }
            Action::Reply { replies, close } => {
                for reply in replies {
                    self.queue_send(session, reply, 0);
                }
                if close {
                    self.queue_close(session);
                }
            }
        }

        // SAFETY: `buf` was just taken above and has not been resubmitted.
        unsafe {
            self.recv_buffers.resubmit_buf(buf, buffer_id);
        }
    }

    fn handle_send(&mut self, cqe: &cqueue::Entry, traced: Box<TracedFrame>) {
        let Frame::Send { session, data, offset, budget } = traced.frame else {
            unreachable!("handle_send called with a non-Send frame");
        };
        self.send_budget.free(budget);

        let result = cqe.result();
        if result < 0 {
            log::warn!(target: "classic_server", "send error on session {}: {}", session.0, io::Error::from_raw_os_error(-result));
            self.queue_close(session);
            return;
        }

        let sent = result as usize;
        let new_offset = offset + sent;
        if new_offset < data.len() {
            // Partial send: re-queue the remainder rather than dropping it.
            self.queue_send(session, data, new_offset);
        } else if let Some(s) = self.sessions.get_mut(session) {
            s.total_bytes_out += data.len() as u64;
        }
    }

    fn handle_close(&mut self, cqe: &cqueue::Entry, session: SessionId) {
        let result = cqe.result();
        if result < 0 {
            let errno = -result;
            if errno != libc::EBADF {
                log::warn!(target: "classic_server", "close error on session {}: {}", session.0, io::Error::from_raw_os_error(errno));
            }
        }
        if let Some(released) = self.sessions.release(session) {
            log::debug!(
                target: "classic_server",
                "session {} released (in: {} bytes, out: {} bytes)",
                session.0,
                released.total_bytes_in,
                released.total_bytes_out
            );
        }
    }

    /// Queues a close for every still-open session and polls until the ring
    /// has drained them. Used for an orderly shutdown; the reference
    /// server's own `main` never calls this and runs forever instead.
    pub fn close(&mut self, hook: &mut dyn WorldHook) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.queue_close(id);
        }
        while self.sessions.len() > 0 {
            self.poll(hook);
        }
    }
}

fn buf_ring_entries(max_connections: usize) -> u16 {
    // Must be a power of two for the buffer ring's mask arithmetic; pick the
    // smallest one that gives every connection a little headroom.
    (max_connections.next_power_of_two() * 4).clamp(64, u16::MAX as usize / 2) as u16
}

fn peer_address(fd: i32) -> Option<(IpAddr, u16)> {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    // SAFETY: `addr`/`len` describe a valid, appropriately sized buffer.
    let rc = unsafe { libc::getpeername(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if rc != 0 {
        return None;
    }
    let ip = IpAddr::from(u32::from_be(addr.sin_addr.s_addr).to_be_bytes());
    let port = u16::from_be(addr.sin_port);
    Some((ip, port))
}

/// A memory map of a ring of buffer descriptors shared with the kernel,
/// along with the buffers themselves — registered once via
/// `register_buf_ring` and refilled as multishot receives consume them.
struct BufferRing {
    addr: *mut libc::c_void,
    num_entries: u16,
    buf_size: u32,
    private_tail: u16,
    group_id: u16,
    buffers: Vec<Box<[u8]>>,
}

impl BufferRing {
    fn new(ring: &mut IoUring, num_entries: u16, buf_size: u32, group_id: u16) -> Result<Self> {
        assert!(num_entries.is_power_of_two());

        let len = (num_entries as usize) * std::mem::size_of::<types::BufRingEntry>();
        // SAFETY: anonymous, zero-initialized mapping of `len` bytes.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_SHARED | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Ring(io::Error::last_os_error()));
        }

        let mut ring_buf = Self {
            addr,
            num_entries,
            buf_size,
            private_tail: 0,
            group_id,
            buffers: Vec::with_capacity(num_entries as usize),
        };

        // SAFETY: `addr` is a freshly created, correctly sized mapping.
        unsafe {
            ring.submitter()
                .register_buf_ring(ring_buf.addr as u64, num_entries, group_id)
                .map_err(Error::Ring)?;
        }

        for i in 0..num_entries {
            ring_buf.buffers.push(vec![0u8; buf_size as usize].into_boxed_slice());
            let ptr = ring_buf.buffers[i as usize].as_mut_ptr();
            ring_buf.push_buf(ptr, buf_size, i);
        }
        ring_buf.publish_bufs();

        Ok(ring_buf)
    }

    fn mask(&self) -> u16 {
        self.num_entries - 1
    }

    fn push_buf(&mut self, addr: *mut u8, len: u32, bid: u16) {
        let entries = self.addr as *mut types::BufRingEntry;
        let index = self.private_tail & self.mask();
        // SAFETY: `index` is within the `num_entries`-sized mapping.
        let entry = unsafe { &mut *entries.add(index as usize) };
        entry.set_addr(addr as u64);
        entry.set_len(len);
        entry.set_bid(bid);
        self.private_tail = self.private_tail.wrapping_add(1);
    }

    fn publish_bufs(&mut self) {
        let base = self.addr as *const types::BufRingEntry;
        // SAFETY: `base` is the mapping passed to `register_buf_ring`.
        let tail_ptr = unsafe { types::BufRingEntry::tail(base) } as *const AtomicU16;
        // SAFETY: the kernel only reads this field; ordinary atomic store.
        unsafe { (*tail_ptr).store(self.private_tail, Ordering::Release) };
    }

    /// # Safety
    /// `id` must name a buffer most recently handed back by the kernel in a
    /// completion, and not already taken since that completion.
    unsafe fn take_buf(&mut self, id: u16) -> Box<[u8]> {
        std::mem::take(&mut self.buffers[id as usize])
    }

    /// # Safety
    /// `buf` must be the box most recently returned by [`take_buf`] for `id`.
    unsafe fn resubmit_buf(&mut self, mut buf: Box<[u8]>, id: u16) {
        self.push_buf(buf.as_mut_ptr(), self.buf_size, id);
        self.buffers[id as usize] = buf;
        self.publish_bufs();
    }
}
