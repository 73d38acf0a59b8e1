// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

/// Command-line configuration for the `classic-server` binary.
///
/// Mirrors the engine's own [`crate::engine::Params`]; `0` for
/// `queue_depth`/`frame_pool_size` means "let the engine pick a default".
#[derive(Debug, Parser)]
#[command(name = "classic-server", about = "A classic multiplayer protocol server")]
pub struct Config {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 25565)]
    pub port: u16,

    /// Maximum number of concurrently connected sessions.
    #[arg(long, default_value_t = 1024)]
    pub max_connections: usize,

    /// io_uring submission/completion queue depth. 0 lets the engine choose.
    #[arg(long, default_value_t = 0)]
    pub queue_depth: u32,

    /// Number of frames in the free-list pool. 0 lets the engine choose.
    #[arg(long, default_value_t = 0)]
    pub frame_pool_size: usize,

    /// Increase log verbosity. May be repeated (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Converts the CLI-level verbosity count into an `env_logger` filter,
    /// applied only when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn params(&self) -> crate::engine::Params {
        crate::engine::Params {
            max_connections: self.max_connections,
            queue_depth: if self.queue_depth == 0 { 256 } else { self.queue_depth },
            frame_pool_size: if self.frame_pool_size == 0 {
                self.max_connections * 32
            } else {
                self.frame_pool_size
            },
        }
    }
}
