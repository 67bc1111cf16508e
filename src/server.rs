use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};
use mio::net::TcpListener;

use crate::client::WebSocketClient;
use crate::config::{ServerConfig, WebSocketConfig};
use crate::frame::OpCode;
use crate::frame_handler::ClientHandler;
use crate::reactor::{Reactor, ReactiveHandle};

/// Reserved reactor id for the listening socket. Client ids come from
/// `AsRawFd`, which on every supported platform is bounded well below
/// `usize::MAX`, so this sentinel never collides with a real connection.
const LISTENER_ID: usize = usize::MAX;

/// Accept loop, client registry and orderly shutdown over one bound
/// listener. Owns every accepted `WebSocketClient`; the reactor it drives
/// holds only non-owning `Weak` handles into that registry (see the
/// reactor's owner/observer split).
pub struct WebSocketServer {
    listener: Option<TcpListener>,
    reactor: Reactor,
    clients: HashMap<usize, Rc<RefCell<WebSocketClient>>>,
    web_socket_config: WebSocketConfig,
    handler_factory: Box<dyn Fn() -> Box<dyn ClientHandler>>,
}

impl WebSocketServer {
    pub fn bind(
        config: ServerConfig,
        handler_factory: impl Fn() -> Box<dyn ClientHandler> + 'static,
    ) -> io::Result<Self> {
        let mut listener = TcpListener::bind(config.bind_addr)?;
        let mut reactor = Reactor::new()?;
        reactor.add_raw_source(&mut listener, LISTENER_ID)?;
        Ok(Self {
            listener: Some(listener),
            reactor,
            clients: HashMap::new(),
            web_socket_config: config.web_socket_config,
            handler_factory: Box::new(handler_factory),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.require_listener()?.local_addr()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// One reactor tick: dispatches readiness to every client, then drains
    /// any connections the listener accepted, then prunes clients that
    /// closed during this tick's dispatch.
    pub fn tick(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let ready = self.reactor.react(timeout)?;
        if ready.contains(&LISTENER_ID) {
            self.accept_pending()?;
        }
        self.clients.retain(|_, client| client.borrow().is_open());
        Ok(())
    }

    /// Runs `tick` forever. Intended for a dedicated server binary; library
    /// consumers that need to interleave other work should call `tick`
    /// directly from their own loop instead.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.tick(None)?;
        }
    }

    /// Writes `payload` to every client currently in the OK state. A
    /// failure on one peer is logged and swallowed so it cannot abort
    /// delivery to the rest.
    pub fn broadcast(&mut self, opcode: OpCode, payload: &[u8]) {
        for client in self.clients.values() {
            let mut client = client.borrow_mut();
            let id = client.id();
            if let Err(err) = client.send(opcode, payload) {
                warn!("broadcast to client {id} failed: {err}");
            }
        }
    }

    /// Closes every client (swallowing per-client errors), deregisters the
    /// listener from the reactor, then closes the listening socket.
    pub fn close(&mut self, code: u16, reason: Vec<u8>) {
        for client in self.clients.values() {
            client.borrow_mut().close(code, reason.clone());
        }
        self.clients.clear();
        self.reactor.remove_raw_source(LISTENER_ID);
        self.listener = None;
    }

    fn accept_pending(&mut self) -> io::Result<()> {
        loop {
            let accepted = match self.require_listener()?.accept() {
                Ok((stream, _addr)) => stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };

            let handler = (self.handler_factory)();
            let client = Rc::new(RefCell::new(WebSocketClient::new(
                accepted,
                &self.web_socket_config,
                handler,
            )));
            let id = client.borrow().id();
            let handle: Rc<RefCell<dyn ReactiveHandle>> = client.clone();
            self.reactor.add(&handle)?;
            self.clients.insert(id, client);
            debug!("accepted connection id={id}");
        }
    }

    fn require_listener(&self) -> io::Result<&TcpListener> {
        self.listener
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "server already closed"))
    }
}
