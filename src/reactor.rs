use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::Duration;

use log::{debug, warn};
use mio::{Events, Interest, Poll, Token};

use crate::error::Error;

/// The boundary toward user code: anything the reactor dispatches readiness
/// events to. The server and `WebSocketClient` both satisfy this.
pub trait ReactiveHandle {
    fn id(&self) -> usize;
    fn is_open(&self) -> bool;

    /// Exposes the underlying `mio` event source so the reactor can
    /// register/deregister it without needing to know the concrete
    /// transport type.
    fn source(&mut self) -> &mut dyn mio::event::Source;

    fn on_readable(&mut self) -> Result<(), Error>;

    /// RFC out-of-band / urgent TCP data. Plain `mio` sockets never surface
    /// this condition, so in practice the reactor never calls it — it
    /// remains part of the contract for handles that want to model the
    /// channel explicitly (see the reactor's design note on OOB).
    fn on_out_of_band(&mut self) -> Result<(), Error>;

    /// Called by the reactor when a callback raised an error that was not
    /// already a `WebSocketError` the handle knows how to close itself
    /// with. A no-op if the handle is already closed.
    fn force_close(&mut self);
}

pub type Handle = Rc<RefCell<dyn ReactiveHandle>>;

/// Select-based readiness dispatch over a set of registered reactive
/// handles, on one thread. "Select" here is `mio::Poll`, which multiplexes
/// the best available OS readiness primitive (epoll/kqueue/IOCP) behind one
/// API — the idiomatic Rust analogue of a BSD `select(2)` loop.
///
/// Ownership mirrors the owner/observer split: whoever calls `add` (the
/// server) keeps the strong `Rc`; the reactor stores only a `Weak` and
/// upgrades it each tick, so a handle the owner has dropped is silently
/// skipped rather than kept alive by the reactor's own bookkeeping.
pub struct Reactor {
    poll: Poll,
    events: Events,
    handles: HashMap<usize, Weak<RefCell<dyn ReactiveHandle>>>,
    /// Ids registered via `add_raw_source` (the listening socket): readable,
    /// but dispatched by the owner rather than through `ReactiveHandle`,
    /// since "readable" means "has a pending connection to accept" rather
    /// than "has bytes for `on_readable`".
    raw_ids: HashSet<usize>,
}

impl Reactor {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            handles: HashMap::new(),
            raw_ids: HashSet::new(),
        })
    }

    pub fn count(&self) -> usize {
        self.handles.len()
    }

    pub fn add(&mut self, handle: &Handle) -> std::io::Result<()> {
        let id = handle.borrow().id();
        let token = Token(id);
        self.poll
            .registry()
            .register(handle.borrow_mut().source(), token, Interest::READABLE)?;
        self.handles.insert(id, Rc::downgrade(handle));
        Ok(())
    }

    /// Registers a raw event source (the listening socket) under `id`. Its
    /// readiness is reported back through `react`'s return value, but the
    /// reactor never calls any callback on it directly.
    pub fn add_raw_source(
        &mut self,
        source: &mut dyn mio::event::Source,
        id: usize,
    ) -> std::io::Result<()> {
        self.poll
            .registry()
            .register(source, Token(id), Interest::READABLE)?;
        self.raw_ids.insert(id);
        Ok(())
    }

    /// Best-effort bookkeeping: stops treating `id` as a raw source. The OS
    /// discards the underlying `epoll`/`kqueue` registration automatically
    /// once the owner closes the corresponding file descriptor.
    pub fn remove_raw_source(&mut self, id: usize) {
        self.raw_ids.remove(&id);
    }

    /// Deregisters `id`. A handle that has already closed itself (its
    /// transport gone, `is_open()` false) is dropped from the registry
    /// without touching `source()`: the OS discards the underlying
    /// `epoll`/`kqueue` registration automatically once the owner closes
    /// the corresponding file descriptor, and the handle's own `source()`
    /// is no longer safe to call past that point.
    pub fn remove(&mut self, id: usize) {
        if let Some(weak) = self.handles.remove(&id) {
            if let Some(handle) = weak.upgrade() {
                if handle.borrow().is_open() {
                    let _ = self.poll.registry().deregister(handle.borrow_mut().source());
                }
            }
        }
    }

    /// One reactor tick: selects the registered set for readability, then
    /// dispatches `on_readable` to each ready `ReactiveHandle` in registry
    /// order. Ids registered via `add_raw_source` are left undispatched.
    /// Returns every id that was ready this tick (handles and raw sources
    /// alike), so the owner can react to raw-source readiness itself.
    ///
    /// Handles may add, remove, or close other handles from within a
    /// callback; the ready set is snapshotted as ids before dispatch so
    /// that concurrent membership changes during the loop are safe.
    pub fn react(&mut self, timeout: Option<Duration>) -> std::io::Result<Vec<usize>> {
        self.poll.poll(&mut self.events, timeout)?;

        let ready_ids: Vec<usize> = self.events.iter().map(|e| e.token().0).collect();

        for &id in &ready_ids {
            if self.raw_ids.contains(&id) {
                continue;
            }
            let Some(weak) = self.handles.get(&id) else {
                continue;
            };
            let Some(handle) = weak.upgrade() else {
                self.handles.remove(&id);
                continue;
            };
            if !handle.borrow().is_open() {
                self.remove(id);
                continue;
            }

            let result = handle.borrow_mut().on_readable();
            if let Err(err) = result {
                warn!("reactive handle {id} raised an error, closing: {err}");
                handle.borrow_mut().force_close();
            }

            if !handle.borrow().is_open() {
                debug!("reactive handle {id} closed, removing from reactor");
                self.remove(id);
            }
        }

        Ok(ready_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// A minimal handle backed by a real socketpair-like loopback
    /// connection, so `mio` has something genuine to register and select.
    struct TestHandle {
        id: usize,
        stream: mio::net::TcpStream,
        open: Rc<Cell<bool>>,
        readable_calls: Rc<Cell<usize>>,
    }

    impl ReactiveHandle for TestHandle {
        fn id(&self) -> usize {
            self.id
        }
        fn is_open(&self) -> bool {
            self.open.get()
        }
        fn source(&mut self) -> &mut dyn mio::event::Source {
            &mut self.stream
        }
        fn on_readable(&mut self) -> Result<(), Error> {
            self.readable_calls.set(self.readable_calls.get() + 1);
            let mut buf = [0u8; 64];
            use std::io::Read;
            match self.stream.read(&mut buf) {
                Ok(0) => self.open.set(false),
                _ => {}
            }
            Ok(())
        }
        fn on_out_of_band(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn force_close(&mut self) {
            self.open.set(false);
        }
    }

    #[test]
    fn react_dispatches_readable_handles_and_removes_closed_ones() {
        use std::net::TcpListener as StdListener;

        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client_std = std::net::TcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();

        let server_mio = mio::net::TcpStream::from_std(server_std);
        let open = Rc::new(Cell::new(true));
        let readable_calls = Rc::new(Cell::new(0));
        let handle: Handle = Rc::new(RefCell::new(TestHandle {
            id: 42,
            stream: server_mio,
            open: open.clone(),
            readable_calls: readable_calls.clone(),
        }));

        let mut reactor = Reactor::new().unwrap();
        reactor.add(&handle).unwrap();
        assert_eq!(reactor.count(), 1);

        use std::io::Write;
        client_std.write_all(b"hi").unwrap();

        let ready = reactor.react(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, vec![42]);
        assert_eq!(readable_calls.get(), 1);
        assert_eq!(reactor.count(), 1);

        drop(client_std);
        // Peer shutdown surfaces as a readable event with a zero-length read.
        reactor.react(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(reactor.count(), 0);
    }

    #[test]
    fn dropping_the_owners_rc_orphans_the_weak_entry() {
        use std::net::TcpListener as StdListener;

        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client_std = std::net::TcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        server_std.set_nonblocking(true).unwrap();

        let handle: Handle = Rc::new(RefCell::new(TestHandle {
            id: 7,
            stream: mio::net::TcpStream::from_std(server_std),
            open: Rc::new(Cell::new(true)),
            readable_calls: Rc::new(Cell::new(0)),
        }));

        let mut reactor = Reactor::new().unwrap();
        reactor.add(&handle).unwrap();
        assert_eq!(reactor.count(), 1);

        drop(handle);
        // The reactor only held a Weak; the registry entry is now dead and
        // cleaned up the next time it is looked up, with no panic.
        let ready = reactor.react(Some(Duration::from_millis(50))).unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn raw_source_readiness_is_reported_but_never_dispatched() {
        use std::net::TcpListener as StdListener;

        let std_listener = StdListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let mut listener = mio::net::TcpListener::from_std(std_listener);

        let mut reactor = Reactor::new().unwrap();
        reactor.add_raw_source(&mut listener, 99).unwrap();

        let _pending = std::net::TcpStream::connect(addr).unwrap();
        let ready = reactor.react(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, vec![99]);
        assert_eq!(reactor.count(), 0);
    }
}
