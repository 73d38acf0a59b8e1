// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The completion-based server for the classic multiplayer protocol.
//!
//! This crate is a pure protocol endpoint: it terminates TCP connections,
//! runs the handshake/authentication state machine, and decodes/encodes
//! packets via `classic_protocol`. It holds no game-state of its own —
//! anything position/chunk/world related is handed to a [`WorldHook`]
//! implementation the caller supplies.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod pool;
pub mod ring_buffer;
pub mod session;

pub use config::Config;
pub use dispatch::{NullWorldHook, WorldHook};
pub use engine::{Engine, Params};
pub use error::{Error, Result};
