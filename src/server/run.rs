//! Server bootstrap and lifecycle.
//!
//! Startup order matters: the journal is replayed to the last committed state
//! *before* the listener opens, so no client ever observes a half-recovered
//! roster. After that, three kinds of thread run: this acceptor, one handler
//! per connection, and the single state thread.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;

use super::bootstrap;
use super::conn::handle_client;
use super::state::{ServerState, StateMessage, StateRequest, run_state_loop};
use crate::config::Config;
use crate::core::Limits;
use crate::journal::{IdAllocator, Journal};

/// A running server, owned by the caller. Tests use this to get the bound
/// address and to stop the server between scenarios.
pub struct ServerHandle {
    local_addr: SocketAddr,
    req_tx: Sender<StateMessage>,
    shutdown: Arc<AtomicBool>,
    accept_thread: JoinHandle<()>,
    state_thread: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, flush the state thread, and wait for both to exit.
    /// Connection threads notice their shutdown flags within a receive
    /// timeout and die on their own.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);

        let (respond, rx) = crossbeam::channel::bounded(1);
        let _ = self.req_tx.send(StateMessage {
            request: StateRequest::Shutdown,
            respond,
        });
        let _ = rx.recv_timeout(Duration::from_secs(10));
        drop(self.req_tx);

        let _ = self.accept_thread.join();
        let _ = self.state_thread.join();
        tracing::info!("server stopped");
    }
}

/// Replay the journal, bind the listener, and spawn the server threads.
pub fn start(config: Config) -> crate::Result<ServerHandle> {
    let mut journal = Journal::open(&config.journal_path)?;
    let replayed = bootstrap::replay(&mut journal);
    let state = ServerState::new(
        journal,
        IdAllocator::new(replayed.last_id),
        replayed.users,
        replayed.groups,
        replayed.messages,
        config.limits.clone(),
    );

    let listener = TcpListener::bind(&config.listen_addr)?;
    let local_addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    tracing::info!(addr = %local_addr, "listening");

    let (req_tx, req_rx) = crossbeam::channel::unbounded::<StateMessage>();
    let state_thread = std::thread::spawn(move || run_state_loop(state, req_rx));

    let shutdown = Arc::new(AtomicBool::new(false));
    let accept_thread = {
        let req_tx = req_tx.clone();
        let shutdown = Arc::clone(&shutdown);
        let limits = config.limits.clone();
        std::thread::spawn(move || accept_loop(listener, req_tx, shutdown, limits))
    };

    Ok(ServerHandle {
        local_addr,
        req_tx,
        shutdown,
        accept_thread,
        state_thread,
    })
}

fn accept_loop(
    listener: TcpListener,
    req_tx: Sender<StateMessage>,
    shutdown: Arc<AtomicBool>,
    limits: Limits,
) {
    let poll = Duration::from_millis(limits.accept_poll_ms);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                let req_tx = req_tx.clone();
                let limits = limits.clone();
                std::thread::spawn(move || {
                    let _ = stream.set_nodelay(true);
                    handle_client(stream, req_tx, limits);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(poll);
            }
            Err(e) => {
                tracing::error!("accept error: {}", e);
            }
        }
    }
}

/// Run until a shutdown signal arrives. This is what the binary calls.
pub fn run(config: Config) -> crate::Result<()> {
    let handle = start(config)?;

    let term = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term));

    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }
    tracing::info!("shutdown signal received");

    handle.shutdown();
    Ok(())
}
