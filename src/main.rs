//! wirestep: one-shot HTTP-style request/response over TCP
//!
//! A single request and a single response per connection, carried over
//! a hand-written transport layer:
//! - `runtime`: descriptor ownership, blocking/cooperative I/O policies, line buffering
//! - `protocols::http`: start line, headers and body framing
//! - `server`: sequential, thread-per-connection, worker pool and event-loop schedulers
//! - `client`: the matching one-shot client
//!
//! Configuration via CLI arguments or TOML file.

mod app;
mod client;
mod config;
mod error;
mod protocols;
mod runtime;
mod server;

use app::{reply_payload, FixedReply};
use config::{Command, Config};
use server::Server;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.command.clone() {
        Command::Serve => serve(config),
        Command::Send {
            addr,
            message,
            method,
            target,
        } => send(&config, &addr, &message, method, &target),
    }
}

/// Run the fixed-reply server until a `Done` message stops it.
fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.listen.parse()?;
    let server = Server::bind(addr, config.server_options())?;

    info!(
        addr = %server.local_addr(),
        scheduler = ?config.scheduler,
        workers = config.workers,
        reply_size = ?config.reply_size,
        "Starting wirestep server"
    );

    let app = FixedReply::new(reply_payload(config.reply_size), server.stop_signal());
    server.run(Arc::new(app))?;
    Ok(())
}

/// Send one request and print the response body to stdout.
fn send(
    config: &Config,
    addr: &str,
    message: &str,
    method: protocols::http::Method,
    target: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client::send(addr, method, target, message.as_bytes(), config.limits())?;
    info!(status = ?response.status(), "Response received");

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(response.body())?;
    stdout.write_all(b"\n")?;
    Ok(())
}
