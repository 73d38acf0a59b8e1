// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

/// Errors that can arise from creating or running a [`crate::Engine`].
///
/// Per-session failures (a malformed packet, a dropped connection) are not
/// represented here — they are handled inline by the completion handlers and
/// never bubble out of the poll loop. This type is for the conditions that
/// make the engine itself unusable.
#[derive(Debug)]
pub enum Error {
    /// Failed to set up the io_uring instance (`IoUring::new`, buffer ring
    /// registration).
    Ring(std::io::Error),

    /// Failed to bind or configure the listening socket.
    Listen(std::io::Error),

    /// The pool allocator or a session's ring buffer could not be allocated
    /// at the requested size.
    ResourceExhausted(&'static str),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ring(e) => write!(f, "io_uring setup failed: {e}"),
            Self::Listen(e) => write!(f, "failed to bind listener: {e}"),
            Self::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Ring(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
