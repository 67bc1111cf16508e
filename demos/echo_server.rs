//! Echoes every text and binary message back to the sender.
//!
//! Run with `cargo run --example echo_server`; set `RUST_LOG=debug` for
//! per-connection tracing.

use socket_reactor::{ClientHandler, Responder, ServerConfig, WebSocketServer};

struct EchoHandler;

impl ClientHandler for EchoHandler {
    fn on_text(&mut self, responder: &mut dyn Responder, text: String) {
        log::debug!("echoing {} bytes of text", text.len());
        if let Err(err) = responder.send_text(&text) {
            log::warn!("failed to echo text: {err}");
        }
    }

    fn on_binary(&mut self, responder: &mut dyn Responder, data: Vec<u8>) {
        log::debug!("echoing {} bytes of binary", data.len());
        if let Err(err) = responder.send_binary(&data) {
            log::warn!("failed to echo binary: {err}");
        }
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9001".to_string());
    let config = ServerConfig::new(addr.parse().expect("invalid bind address"));

    let mut server = WebSocketServer::bind(config, || {
        Box::new(EchoHandler) as Box<dyn ClientHandler>
    })?;

    log::info!("echo server listening on {}", server.local_addr()?);
    server.run()
}
