// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;
use classic_server::{Config, Engine, NullWorldHook};

fn main() {
    let config = Config::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        env_logger::Builder::new().parse_filters(config.log_filter()).init();
    } else {
        env_logger::init();
    }

    let mut engine = match Engine::create(config.params()) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!(target: "classic_server", "failed to create engine: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.listen(config.port) {
        log::error!(target: "classic_server", "failed to listen on port {}: {e}", config.port);
        std::process::exit(1);
    }

    log::info!(target: "classic_server", "listening on port {}", config.port);

    let mut hook = NullWorldHook;
    // No external world-state collaborator is wired up in this binary, so
    // the poll loop runs forever. `Engine::poll` blocks in
    // `submit_and_wait` until a completion is ready — the loop's only
    // suspension point — so there is nothing to pace here.
    loop {
        engine.poll(&mut hook);
    }
}
