//! Broadcasts every text message it receives to all connected peers.
//!
//! Run with `cargo run --example chat_server`; set `RUST_LOG=debug` for
//! per-connection tracing.
//!
//! `ClientHandler` callbacks only see the connection that triggered them
//! (via `Responder`), not the server's client registry, so fan-out can't
//! happen inline inside `on_text`. Instead each handler drops incoming
//! text into a shared outbox; the accept loop drains it after every tick
//! and hands the messages to `WebSocketServer::broadcast`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use socket_reactor::{ClientHandler, OpCode, Responder, ServerConfig, WebSocketServer};

type Outbox = Rc<RefCell<VecDeque<String>>>;

struct ChatHandler {
    outbox: Outbox,
}

impl ClientHandler for ChatHandler {
    fn on_text(&mut self, _responder: &mut dyn Responder, text: String) {
        self.outbox.borrow_mut().push_back(text);
    }
}

fn main() -> std::io::Result<()> {
    env_logger::init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9002".to_string());
    let config = ServerConfig::new(addr.parse().expect("invalid bind address"));

    let outbox: Outbox = Rc::new(RefCell::new(VecDeque::new()));
    let handler_outbox = outbox.clone();
    let mut server = WebSocketServer::bind(config, move || {
        Box::new(ChatHandler {
            outbox: handler_outbox.clone(),
        }) as Box<dyn ClientHandler>
    })?;

    log::info!("chat server listening on {}", server.local_addr()?);
    loop {
        server.tick(Some(Duration::from_millis(200)))?;
        while let Some(message) = outbox.borrow_mut().pop_front() {
            log::debug!("broadcasting {} bytes to {} clients", message.len(), server.client_count());
            server.broadcast(OpCode::Text, message.as_bytes());
        }
    }
}
