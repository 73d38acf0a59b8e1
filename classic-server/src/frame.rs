// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The frame registry: in-flight io_uring operations, round-tripped through
//! the kernel's opaque `user_data` field.
//!
//! Every submission carries a `Box<Frame>` leaked into a `u64` via pointer
//! provenance; the matching completion reconstructs the box and consumes it
//! (or re-leaks it, for multishot operations that stay live across many
//! completions).

use crate::pool::PoolIndex;
use crate::session::SessionId;

/// A single in-flight operation submitted to the ring.
///
/// Each variant borrows exactly the state its completion handler needs, in
/// the same spirit as the reference server's `obs_frame` union — one struct
/// per frame kind rather than one struct with unused fields for the other
/// kinds.
#[derive(Debug)]
pub enum Frame {
    /// The long-lived multishot accept operation on the listening socket.
    Accept,

    /// A multishot receive on a connected session.
    Recv { session: SessionId },

    /// A send in flight on a connected session. `offset` is how much of
    /// `data` a previous partial send already transmitted. `budget` is this
    /// send's slot in the engine's free-list pool, reserved at submission
    /// and released when the send completes (bounding how many sends can be
    /// in flight at once, independent of how many bytes they carry).
    Send {
        session: SessionId,
        data: Vec<u8>,
        offset: usize,
        budget: PoolIndex,
    },

    /// A requested close of a session's socket.
    Close { session: SessionId },
}

/// A frame plus the trace counter value it was created with, for log
/// correlation across a frame's submit/complete pair.
#[derive(Debug)]
pub struct TracedFrame {
    pub trace: u64,
    pub frame: Frame,
}

impl TracedFrame {
    /// `trace` is the engine instance's own monotonic counter (see
    /// `Engine::next_trace`) — scoped per engine rather than a process-wide
    /// global, so two engines in the same process (e.g. in tests) don't
    /// share or race over trace ids.
    pub fn new(trace: u64, frame: Frame) -> Box<Self> {
        Box::new(Self { trace, frame })
    }

    /// Leaks this frame and exposes its pointer's provenance so the value
    /// returned can be handed to the kernel as `user_data` and later
    /// recovered with [`TracedFrame::from_user_data`].
    pub fn into_user_data(self: Box<Self>) -> u64 {
        Box::into_raw(self).expose_provenance() as u64
    }

    /// Re-leaks an already-exposed frame, for multishot operations whose
    /// submission stays live across more than one completion.
    pub fn relinquish(self: Box<Self>) -> u64 {
        Box::into_raw(self) as u64
    }

    /// Reconstructs a previously leaked frame from the kernel's `user_data`.
    ///
    /// # Safety
    ///
    /// `user_data` must have been produced by [`TracedFrame::into_user_data`]
    /// or [`TracedFrame::relinquish`] on a `Box<TracedFrame>` that has not
    /// already been reconstructed.
    pub unsafe fn from_user_data(user_data: u64) -> Box<Self> {
        unsafe { Box::from_raw(std::ptr::with_exposed_provenance::<Self>(user_data as usize) as *mut Self) }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Accept => write!(f, "accept"),
            Frame::Recv { session } => write!(f, "recv on session {}", session.0),
            Frame::Send { session, .. } => write!(f, "send on session {}", session.0),
            Frame::Close { session } => write!(f, "close on session {}", session.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_user_data() {
        let frame = TracedFrame::new(42, Frame::Recv { session: SessionId(7) });
        let user_data = frame.into_user_data();

        // SAFETY: user_data was just produced above and not reconstructed yet.
        let restored = unsafe { TracedFrame::from_user_data(user_data) };
        assert_eq!(restored.trace, 42);
        match restored.frame {
            Frame::Recv { session } => assert_eq!(session, SessionId(7)),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
