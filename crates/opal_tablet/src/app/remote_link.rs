use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use opal_core::{
    handshake_lines, HandlerRegistry, MessageHandler, OutboundMessage, RemoteLink,
    SubscriptionId, TelemetrySink,
};
use tracing::{debug, info, warn};

use super::bootstrap::StartupError;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_PENDING_CONTROL_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT: usize = 256 * 1024;

static LINK_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, operation: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            if LINK_LOCK_POISON_WARNED
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                warn!(operation, "link lock poisoned; recovered inner value");
            }
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundClass {
    /// Handshake and replies to inbound lines.
    Control,
    /// Scene-loop output: logs, actions, snapshots.
    Telemetry,
}

#[derive(Debug)]
struct OutboundChunk {
    class: OutboundClass,
    bytes: Vec<u8>,
}

/// Lines waiting for one client's writer thread. Control lines queue ahead of
/// telemetry, and each class is capped separately by evicting its oldest
/// entries.
#[derive(Debug, Default)]
struct Outbox {
    chunks: VecDeque<OutboundChunk>,
    control_bytes: usize,
    telemetry_bytes: usize,
}

impl Outbox {
    fn queued_bytes_mut(&mut self, class: OutboundClass) -> &mut usize {
        match class {
            OutboundClass::Control => &mut self.control_bytes,
            OutboundClass::Telemetry => &mut self.telemetry_bytes,
        }
    }

    fn enqueue_with_cap(
        &mut self,
        class: OutboundClass,
        line: &str,
        cap: usize,
        diag: bool,
    ) -> bool {
        let bytes = encode_line_payload(line);
        let chunk_bytes = bytes.len();
        if chunk_bytes > cap {
            if diag {
                info!(?class, chunk_bytes, cap, "link_diag_drop_chunk_over_cap");
            }
            return false;
        }

        while self.queued_bytes_mut(class).saturating_add(chunk_bytes) > cap {
            if !self.evict_oldest(class, diag) {
                return false;
            }
        }

        let queued = self.queued_bytes_mut(class);
        *queued = queued.saturating_add(chunk_bytes);
        let chunk = OutboundChunk { class, bytes };
        match class {
            OutboundClass::Control => {
                let insert_at = self
                    .chunks
                    .iter()
                    .position(|existing| existing.class == OutboundClass::Telemetry)
                    .unwrap_or(self.chunks.len());
                self.chunks.insert(insert_at, chunk);
            }
            OutboundClass::Telemetry => self.chunks.push_back(chunk),
        }
        true
    }

    fn evict_oldest(&mut self, class: OutboundClass, diag: bool) -> bool {
        let Some(index) = self.chunks.iter().position(|chunk| chunk.class == class) else {
            return false;
        };
        let Some(removed) = self.chunks.remove(index) else {
            return false;
        };
        let queued = self.queued_bytes_mut(class);
        *queued = queued.saturating_sub(removed.bytes.len());
        if diag {
            info!(
                ?class,
                removed_bytes = removed.bytes.len(),
                queue_len = self.chunks.len(),
                "link_diag_evicted_oldest"
            );
        }
        true
    }

    fn pop_front(&mut self) -> Option<OutboundChunk> {
        let chunk = self.chunks.pop_front()?;
        let queued = self.queued_bytes_mut(chunk.class);
        *queued = queued.saturating_sub(chunk.bytes.len());
        Some(chunk)
    }
}

#[derive(Debug)]
struct ClientWriter {
    id: u64,
    outbox: Arc<Mutex<Outbox>>,
    wake: Sender<()>,
    stream: TcpStream,
}

impl ClientWriter {
    fn push(&self, class: OutboundClass, line: &str, diag: bool) {
        let cap = match class {
            OutboundClass::Control => MAX_PENDING_CONTROL_BYTES_PER_CLIENT,
            OutboundClass::Telemetry => MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT,
        };
        let queued =
            lock_or_recover(&self.outbox, "push").enqueue_with_cap(class, line, cap, diag);
        if !queued {
            debug!(client = self.id, ?class, "link_outbound_chunk_dropped");
            return;
        }
        match self.wake.try_send(()) {
            // Full means the writer already has a wake-up pending.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                debug!(client = self.id, "link_writer_gone_chunk_left_queued");
            }
        }
    }
}

/// Queue side handed to a client's writer thread.
struct ClientOutbound {
    outbox: Arc<Mutex<Outbox>>,
    wake: Receiver<()>,
}

/// Fan-out to every connected controller. Shared by the reader threads (for
/// replies) and the tick loop (for telemetry); neither ever touches a socket.
#[derive(Debug, Clone)]
struct Broadcaster {
    clients: Arc<Mutex<Vec<ClientWriter>>>,
    diag: bool,
}

impl Broadcaster {
    fn new(diag: bool) -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
            diag,
        }
    }

    /// Queues `greeting` for the new client before it can see any broadcast.
    fn admit(&self, id: u64, stream: TcpStream, greeting: &[String]) -> ClientOutbound {
        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let client = ClientWriter {
            id,
            outbox: Arc::new(Mutex::new(Outbox::default())),
            wake,
            stream,
        };
        for line in greeting {
            client.push(OutboundClass::Control, line, self.diag);
        }
        let outbound = ClientOutbound {
            outbox: Arc::clone(&client.outbox),
            wake: wake_rx,
        };
        lock_or_recover(&self.clients, "admit").push(client);
        outbound
    }

    fn remove(&self, id: u64) {
        lock_or_recover(&self.clients, "remove").retain(|client| client.id != id);
    }

    fn send(&self, class: OutboundClass, line: &str) {
        let clients = lock_or_recover(&self.clients, "send");
        for client in clients.iter() {
            client.push(class, line, self.diag);
        }
        if self.diag {
            info!(line, ?class, clients = clients.len(), "link_diag_broadcast_line");
        }
    }

    fn client_count(&self) -> usize {
        lock_or_recover(&self.clients, "client_count").len()
    }

    fn disconnect_all(&self) {
        let mut clients = lock_or_recover(&self.clients, "disconnect_all");
        for client in clients.drain(..) {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }
}

#[derive(Clone)]
struct LinkContext {
    registry: HandlerRegistry,
    broadcaster: Broadcaster,
    stop: Arc<AtomicBool>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    diag: bool,
}

/// TCP command link. The tablet listens on localhost; each remote controller
/// that connects gets the rosbridge handshake plus its own reader and writer
/// threads.
pub(crate) struct TcpRemoteLink {
    context: LinkContext,
    acceptor: Option<JoinHandle<()>>,
    bound_port: u16,
}

impl TcpRemoteLink {
    pub(crate) fn bind_localhost(port: u16, diag: bool) -> Result<Self, StartupError> {
        let bind_error = |source| StartupError::Bind { port, source };
        let listener = TcpListener::bind(localhost_bind_addr(port)).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let bound_port = listener.local_addr().map_err(bind_error)?.port();

        let context = LinkContext {
            registry: HandlerRegistry::new(),
            broadcaster: Broadcaster::new(diag),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(Mutex::new(Vec::new())),
            diag,
        };
        let acceptor_context = context.clone();
        let acceptor = thread::Builder::new()
            .name("opal-link-accept".to_string())
            .spawn(move || accept_loop(listener, acceptor_context))
            .map_err(|source| StartupError::SpawnThread {
                name: "opal-link-accept",
                source,
            })?;

        info!(port = bound_port, "link_listening");
        Ok(Self {
            context,
            acceptor: Some(acceptor),
            bound_port,
        })
    }

    pub(crate) fn bound_port(&self) -> u16 {
        self.bound_port
    }

    pub(crate) fn sink(&self) -> LinkSink {
        LinkSink {
            broadcaster: self.context.broadcaster.clone(),
        }
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.context.broadcaster.client_count()
    }
}

impl RemoteLink for TcpRemoteLink {
    fn subscribe(&mut self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = self.context.registry.subscribe(handler);
        debug!(subscription = id.0, "link_handler_subscribed");
        id
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let removed = self.context.registry.unsubscribe(id);
        debug!(subscription = id.0, removed, "link_handler_unsubscribed");
        removed
    }

    fn close(&mut self) {
        let Some(acceptor) = self.acceptor.take() else {
            return;
        };
        self.context.stop.store(true, Ordering::Release);
        if acceptor.join().is_err() {
            warn!("link_accept_thread_panicked");
        }
        self.context.broadcaster.disconnect_all();

        let workers = std::mem::take(&mut *lock_or_recover(&self.context.workers, "close"));
        for worker in workers {
            if worker.join().is_err() {
                warn!("link_client_thread_panicked");
            }
        }
        info!(port = self.bound_port, "link_closed");
    }
}

impl Drop for TcpRemoteLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Telemetry path from the tick loop onto the link. Sending only queues; a
/// controller that stops reading loses its oldest telemetry instead of
/// stalling the loop.
pub(crate) struct LinkSink {
    broadcaster: Broadcaster,
}

impl TelemetrySink for LinkSink {
    fn send(&mut self, message: &OutboundMessage) {
        if self.broadcaster.client_count() == 0 {
            debug!(topic = message.channel.topic(), "link_no_clients_telemetry_dropped");
            return;
        }
        self.broadcaster
            .send(OutboundClass::Telemetry, &message.to_wire());
    }
}

fn accept_loop(listener: TcpListener, context: LinkContext) {
    let next_client_id = AtomicU64::new(1);
    while !context.stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let id = next_client_id.fetch_add(1, Ordering::Relaxed);
                admit_client(id, stream, peer, &context);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "link_accept_failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("link_accept_loop_stopped");
}

fn admit_client(id: u64, stream: TcpStream, peer: SocketAddr, context: &LinkContext) {
    if let Err(err) = configure_client_stream(&stream) {
        warn!(client = id, error = %err, "link_client_configure_failed");
        return;
    }
    let (writer_stream, control_stream) = match (stream.try_clone(), stream.try_clone()) {
        (Ok(writer), Ok(control)) => (writer, control),
        (Err(err), _) | (_, Err(err)) => {
            warn!(client = id, error = %err, "link_client_clone_failed");
            return;
        }
    };
    let outbound = context
        .broadcaster
        .admit(id, control_stream, &handshake_lines());

    let writer_broadcaster = context.broadcaster.clone();
    let writer = thread::Builder::new()
        .name(format!("opal-link-writer-{id}"))
        .spawn(move || write_loop(id, writer_stream, outbound, writer_broadcaster));
    let writer = match writer {
        Ok(handle) => handle,
        Err(err) => {
            warn!(client = id, error = %err, "link_writer_spawn_failed");
            context.broadcaster.remove(id);
            return;
        }
    };
    lock_or_recover(&context.workers, "admit_client").push(writer);

    let reader_context = context.clone();
    let reader = thread::Builder::new()
        .name(format!("opal-link-client-{id}"))
        .spawn(move || read_loop(id, stream, reader_context));
    match reader {
        Ok(handle) => {
            lock_or_recover(&context.workers, "admit_client").push(handle);
            info!(client = id, peer = %peer, "link_client_connected");
        }
        Err(err) => {
            warn!(client = id, error = %err, "link_reader_spawn_failed");
            context.broadcaster.remove(id);
        }
    }
}

fn configure_client_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_READ_TIMEOUT))?;
    if let Err(err) = stream.set_nodelay(true) {
        warn!(error = %err, "link_client_nodelay_failed");
    }
    Ok(())
}

fn read_loop(id: u64, mut stream: TcpStream, context: LinkContext) {
    let mut read_buf = Vec::new();
    let mut lines = Vec::new();
    let mut chunk = [0u8; 1024];
    while !context.stop.load(Ordering::Acquire) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                read_buf.extend_from_slice(&chunk[..bytes_read]);
                drain_complete_lines(&mut read_buf, &mut lines, context.diag);
                for line in lines.drain(..) {
                    if line.trim().is_empty() {
                        continue;
                    }
                    for reply in context.registry.dispatch(&line) {
                        context
                            .broadcaster
                            .send(OutboundClass::Control, &reply.to_wire());
                    }
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                if !context.stop.load(Ordering::Acquire) {
                    warn!(client = id, error = %err, "link_client_read_failed");
                }
                break;
            }
        }
    }
    context.broadcaster.remove(id);
    info!(client = id, "link_client_disconnected");
}

/// Blocking writes happen only here, so a stalled controller holds up nothing
/// but its own thread. Exits once the client is removed or the socket fails.
fn write_loop(id: u64, mut stream: TcpStream, outbound: ClientOutbound, broadcaster: Broadcaster) {
    while outbound.wake.recv().is_ok() {
        loop {
            let next = lock_or_recover(&outbound.outbox, "write_loop").pop_front();
            let Some(chunk) = next else {
                break;
            };
            if let Err(err) = stream.write_all(&chunk.bytes) {
                warn!(
                    client = id,
                    class = ?chunk.class,
                    error = %err,
                    "link_client_write_failed_dropped"
                );
                broadcaster.remove(id);
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
    }
    debug!(client = id, "link_client_writer_stopped");
}

fn localhost_bind_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>, diag: bool) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop(); // newline
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }

        match String::from_utf8(line_bytes) {
            Ok(line) => {
                if diag {
                    info!(line = %line, "link_diag_remote_line_read");
                }
                out.push(line)
            }
            Err(err) => warn!(error = %err, "link_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_line_payload(line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::time::Instant;

    use opal_core::{CommandInbox, CommandQueue, CHECK_IN_MESSAGE, GOT_MESSAGE_ACK};
    use serde_json::Value;

    use super::*;

    fn connect(link: &TcpRemoteLink) -> BufReader<TcpStream> {
        let stream = TcpStream::connect(localhost_bind_addr(link.bound_port())).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set_read_timeout");
        BufReader::new(stream)
    }

    fn read_json_line(reader: &mut BufReader<TcpStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        serde_json::from_str(line.trim_end()).expect("json line")
    }

    fn read_handshake(reader: &mut BufReader<TcpStream>) -> Vec<Value> {
        (0..handshake_lines().len())
            .map(|_| read_json_line(reader))
            .collect()
    }

    fn send_line(reader: &mut BufReader<TcpStream>, line: &str) {
        let stream = reader.get_mut();
        stream.write_all(line.as_bytes()).expect("write");
        stream.write_all(b"\n").expect("write newline");
        stream.flush().expect("flush");
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn bind_address_is_localhost_only() {
        let addr = localhost_bind_addr(9090);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 9090);
    }

    #[test]
    fn drain_complete_lines_strips_crlf_and_keeps_partial_tail() {
        let mut buffer = b"{\"code\":0}\r\n{\"code\":6}\n{\"co".to_vec();
        let mut out = Vec::new();
        drain_complete_lines(&mut buffer, &mut out, false);
        assert_eq!(out, vec!["{\"code\":0}".to_string(), "{\"code\":6}".to_string()]);
        assert_eq!(buffer, b"{\"co".to_vec());
    }

    #[test]
    fn invalid_utf8_line_is_dropped() {
        let mut buffer = vec![0xff, 0xfe, b'\n', b'o', b'k', b'\n'];
        let mut out = Vec::new();
        drain_complete_lines(&mut buffer, &mut out, false);
        assert_eq!(out, vec!["ok".to_string()]);
    }

    fn queued_lines(outbox: &Outbox) -> Vec<String> {
        outbox
            .chunks
            .iter()
            .map(|chunk| String::from_utf8_lossy(&chunk.bytes).trim_end().to_string())
            .collect()
    }

    #[test]
    fn outbox_evicts_oldest_telemetry_past_cap() {
        let mut outbox = Outbox::default();
        // "tN\n" is three bytes, so a cap of seven keeps two lines.
        for line in ["t1", "t2", "t3"] {
            assert!(outbox.enqueue_with_cap(OutboundClass::Telemetry, line, 7, false));
        }
        assert_eq!(queued_lines(&outbox), vec!["t2", "t3"]);
        assert_eq!(outbox.telemetry_bytes, 6);

        assert!(!outbox.enqueue_with_cap(OutboundClass::Telemetry, "too long", 7, false));
        assert_eq!(queued_lines(&outbox), vec!["t2", "t3"]);
    }

    #[test]
    fn outbox_puts_control_ahead_of_telemetry() {
        let mut outbox = Outbox::default();
        outbox.enqueue_with_cap(OutboundClass::Telemetry, "t1", 64, false);
        outbox.enqueue_with_cap(OutboundClass::Control, "c1", 64, false);
        outbox.enqueue_with_cap(OutboundClass::Telemetry, "t2", 64, false);
        outbox.enqueue_with_cap(OutboundClass::Control, "c2", 64, false);
        assert_eq!(queued_lines(&outbox), vec!["c1", "c2", "t1", "t2"]);

        let first = outbox.pop_front().expect("chunk");
        assert_eq!(first.class, OutboundClass::Control);
        assert_eq!(outbox.control_bytes, 3);
        assert_eq!(outbox.telemetry_bytes, 6);
    }

    #[test]
    fn new_client_receives_handshake_ending_with_check_in() {
        let link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        let mut client = connect(&link);

        let handshake = read_handshake(&mut client);
        assert_eq!(handshake[0]["op"], "advertise");
        assert_eq!(handshake[3]["op"], "subscribe");
        assert_eq!(handshake[3]["topic"], "/opal_command");
        let check_in = handshake.last().expect("check-in line");
        assert_eq!(check_in["topic"], "/opal_tablet");
        assert_eq!(check_in["msg"]["data"], CHECK_IN_MESSAGE);
    }

    #[test]
    fn inbound_line_is_enqueued_and_acknowledged() {
        let queue = CommandQueue::default();
        let mut link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        link.subscribe(Arc::new(CommandInbox::new(queue.handle())));
        let mut client = connect(&link);
        read_handshake(&mut client);

        send_line(&mut client, r#"{"code":6}"#);
        let ack = read_json_line(&mut client);
        assert_eq!(ack["msg"]["data"], GOT_MESSAGE_ACK);
        assert!(wait_until(|| queue.len() == 1));
    }

    #[test]
    fn malformed_line_is_acknowledged_but_not_enqueued() {
        let queue = CommandQueue::default();
        let mut link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        link.subscribe(Arc::new(CommandInbox::new(queue.handle())));
        let mut client = connect(&link);
        read_handshake(&mut client);

        send_line(&mut client, r#"{"code":5,"props":null}"#);
        assert_eq!(read_json_line(&mut client)["msg"]["data"], GOT_MESSAGE_ACK);
        let complaint = read_json_line(&mut client);
        assert!(complaint["msg"]["data"]
            .as_str()
            .expect("text")
            .starts_with("dropped command"));
        assert!(queue.is_empty());
    }

    #[test]
    fn sink_broadcasts_to_connected_clients() {
        let link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        let mut first = connect(&link);
        let mut second = connect(&link);
        read_handshake(&mut first);
        read_handshake(&mut second);

        let mut sink = link.sink();
        sink.send(&OutboundMessage::log("hello"));

        for client in [&mut first, &mut second] {
            let line = read_json_line(client);
            assert_eq!(line["op"], "publish");
            assert_eq!(line["msg"]["data"], "hello");
        }
    }

    #[test]
    fn stalled_client_does_not_hold_up_telemetry() {
        let link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        let _stalled = TcpStream::connect(localhost_bind_addr(link.bound_port())).expect("connect");
        let mut healthy = connect(&link);
        read_handshake(&mut healthy);
        assert!(wait_until(|| link.client_count() == 2));

        let mut sink = link.sink();
        let bulky = "x".repeat(64 * 1024);
        let mut worst = Duration::ZERO;
        for _ in 0..64 {
            let started = Instant::now();
            sink.send(&OutboundMessage::log(bulky.as_str()));
            worst = worst.max(started.elapsed());
        }
        sink.send(&OutboundMessage::log("last"));
        assert!(worst < Duration::from_millis(250), "slowest send took {worst:?}");

        let mut saw_last = false;
        for _ in 0..80 {
            if read_json_line(&mut healthy)["msg"]["data"] == "last" {
                saw_last = true;
                break;
            }
        }
        assert!(saw_last);
        assert_eq!(link.client_count(), 2);
    }

    #[test]
    fn unsubscribed_handler_no_longer_sees_lines() {
        let queue = CommandQueue::default();
        let mut link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        let subscription = link.subscribe(Arc::new(CommandInbox::new(queue.handle())));
        let mut client = connect(&link);
        read_handshake(&mut client);

        assert!(link.unsubscribe(subscription));
        send_line(&mut client, r#"{"code":0}"#);
        thread::sleep(Duration::from_millis(50));
        assert!(queue.is_empty());
    }

    #[test]
    fn close_disconnects_clients_and_is_idempotent() {
        let mut link = TcpRemoteLink::bind_localhost(0, false).expect("bind");
        let mut client = connect(&link);
        read_handshake(&mut client);
        assert!(wait_until(|| link.client_count() == 1));

        link.close();
        link.close();
        assert_eq!(link.client_count(), 0);

        let mut rest = String::new();
        let read = client.read_line(&mut rest).expect("read after close");
        assert_eq!(read, 0);
    }
}
