// Demonstration host program: a TCP echo server plus a heartbeat service,
// built entirely on the public `evloop::Reactor` API. This file carries no
// design weight of its own -- it's wiring, not core logic.
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;

use evloop::{Events, Interest, Reactor, TimerId};

#[derive(Parser, Debug)]
#[command(about = "Event-reactor TCP echo server with a heartbeat service")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 9000)]
    port: u16,

    /// Heartbeat interval, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    heartbeat_ms: u64,

    /// Idle timeout before a client is disconnected, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    client_timeout_ms: u64,
}

struct ClientInfo {
    stream: TcpStream,
    timeout_timer: TimerId,
    rbytes: u64,
}

struct Server {
    reactor: Reactor,
    clients: HashMap<RawFd, ClientInfo>,
    client_timeout: Duration,
    connections: usize,
}

type Shared = Arc<Mutex<Server>>;

fn disconnect_client(shared: &Shared, fd: RawFd) {
    let mut server = shared.lock().unwrap();
    if let Some(client) = server.clients.remove(&fd) {
        server.reactor.remove_timer(client.timeout_timer);
        server.reactor.remove_fd(fd);
        server.connections -= 1;
        log::info!("client {} disconnected (remaining: {})", fd, server.connections);
        // `client.stream` drops here, closing the socket -- the reactor
        // never closes fds it didn't open itself.
    }
}

fn handle_client_event(shared: &Shared, fd: RawFd, events: Events) {
    if events.intersects(Events::ERROR | Events::HANGUP) {
        disconnect_client(shared, fd);
        return;
    }
    if !events.contains(Events::READABLE) {
        return;
    }

    let mut buf = [0u8; 1024];
    let read_result = {
        let mut server = shared.lock().unwrap();
        server.clients.get_mut(&fd).map(|c| c.stream.read(&mut buf))
    };
    match read_result {
        Some(Ok(0)) | None => disconnect_client(shared, fd),
        Some(Ok(n)) => {
            let write_ok = {
                let mut server = shared.lock().unwrap();
                match server.clients.get_mut(&fd) {
                    Some(c) => {
                        c.rbytes += n as u64;
                        c.stream.write_all(&buf[..n]).is_ok()
                    }
                    None => true,
                }
            };
            if !write_ok {
                disconnect_client(shared, fd);
            }
        }
        Some(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Some(Err(_)) => disconnect_client(shared, fd),
    }
}

fn accept_clients(shared: &Shared, listener: &TcpListener) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    log::warn!("failed to set client {} non-blocking: {}", addr, e);
                    continue;
                }
                let fd = stream.as_raw_fd();
                let client_timeout = shared.lock().unwrap().client_timeout;

                let shared_for_fd = shared.clone();
                let shared_for_timer = shared.clone();
                let registered = {
                    let mut server = shared.lock().unwrap();
                    let ok = server.reactor.add_fd(fd, Interest::READABLE, Box::new(move |fd, _, events| {
                        handle_client_event(&shared_for_fd, fd, events);
                    }));
                    if ok {
                        let timeout_timer = server.reactor.add_timer(client_timeout, Box::new(move |_| {
                            log::info!("client {} idle timeout, disconnecting", fd);
                            disconnect_client(&shared_for_timer, fd);
                        }), false).expect("timer interval is non-zero");
                        server.clients.insert(fd, ClientInfo { stream, timeout_timer, rbytes: 0 });
                        server.connections += 1;
                        log::info!("client {} connected from {} (total: {})", fd, addr, server.connections);
                    }
                    ok
                };
                if !registered {
                    log::warn!("fd {} already registered, dropping new connection", fd);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                log::error!("accept failed: {}", e);
                break;
            }
        }
    }
}

struct Heartbeat {
    reactor: Reactor,
    timer_id: Option<TimerId>,
    counter: u64,
}

impl Heartbeat {
    fn start(reactor: Reactor, interval: Duration) -> Arc<Mutex<Heartbeat>> {
        let heartbeat = Arc::new(Mutex::new(Heartbeat { reactor: reactor.clone(), timer_id: None, counter: 0 }));
        let hb = heartbeat.clone();
        let timer_id = reactor.add_timer(interval, Box::new(move |_| {
            let mut hb = hb.lock().unwrap();
            hb.counter += 1;
            log::info!("heartbeat #{}", hb.counter);
            if hb.counter == 20 {
                log::info!("slowing heartbeat from {:?} to 5s", interval);
                if let Some(id) = hb.timer_id {
                    hb.reactor.update_timer_interval(id, Duration::from_secs(5));
                }
            }
        }), true);
        heartbeat.lock().unwrap().timer_id = timer_id;
        heartbeat
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let reactor = Reactor::new()?;

    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    listener.set_nonblocking(true)?;
    log::info!("listening on port {}", args.port);

    let server = Arc::new(Mutex::new(Server {
        reactor: reactor.clone(),
        clients: HashMap::new(),
        client_timeout: Duration::from_millis(args.client_timeout_ms),
        connections: 0,
    }));

    let listener_fd = listener.as_raw_fd();
    let shared_for_accept = server.clone();
    reactor.add_fd(listener_fd, Interest::READABLE, Box::new(move |_, _, _| {
        accept_clients(&shared_for_accept, &listener);
    }));

    let _heartbeat = Heartbeat::start(reactor.clone(), Duration::from_millis(args.heartbeat_ms));

    let reactor_for_signal = reactor.clone();
    let mut signals = Signals::new([SIGINT])?;
    std::thread::spawn(move || {
        // Blocks in a dedicated thread; stop() itself is an ordinary,
        // thread-safe call, not signal-handler code.
        if signals.forever().next().is_some() {
            log::info!("received SIGINT, stopping reactor");
            reactor_for_signal.stop();
        }
    });

    reactor.run(Some(Duration::from_secs(10)))?;
    log::info!("reactor stopped");
    Ok(())
}
