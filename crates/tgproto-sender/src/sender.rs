use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};

use log::{debug, info, trace, warn};
use tgproto_crypto::RingBuffer;
use tgproto_mtproto::{authentication, mtp, transport, Deserialization, Mtp, MsgId, OutboundMessage, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::{sleep_until, Instant};

use crate::errors::{InvocationError, ReadError};
use crate::net::{NetStream, ServerAddr};

/// The maximum data willing to be sent or received at once; a fixed buffer
/// avoids allocating past this even if the peer sends nonsense.
const MAXIMUM_DATA: usize = (1024 * 1024) + (8 * 1024);

/// Largest plaintext body accepted into a single message: `MAX_MESSAGE_INTS`
/// 32-bit words (`2^16` of them), minus the encrypted envelope's own header
/// and padding overhead. This bounds what gets handed to the wire codec, and
/// is unrelated to the container/transport framing limits the codec itself
/// enforces.
const MAX_MESSAGE_INTS: usize = 1 << 16;
const MAX_MESSAGE_BYTES: usize = MAX_MESSAGE_INTS * 4 - 16;

/// Largest inbound frame accepted before the transport layer; bigger frames
/// are discarded rather than causing the connection to fail.
const MAX_RESPONSE_SIZE: usize = 1 << 24;

const PING_DELAY: Duration = Duration::from_secs(60);
const NO_PING_DISCONNECT: i32 = 75;

const PING_DELAY_DISCONNECT: u32 = 0xf3427b8c;

fn generate_random_id() -> i64 {
    static LAST_ID: AtomicI64 = AtomicI64::new(0);

    let mut last = LAST_ID.load(Ordering::SeqCst);
    if last == 0 {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system time is before epoch")
            .as_nanos() as i64;
        last = LAST_ID.compare_exchange(0, now, Ordering::SeqCst, Ordering::SeqCst).unwrap_or(now);
    }

    LAST_ID.fetch_add(1, Ordering::SeqCst);
    last
}

fn ping_delay_disconnect_body(ping_id: i64, disconnect_delay: i32) -> Vec<u8> {
    let mut w = tgproto_mtproto::wire::Writer::new();
    w.write_u32(PING_DELAY_DISCONNECT);
    w.write_i64(ping_id);
    w.write_i32(disconnect_delay);
    w.into_bytes()
}

/// Per-request flags affecting how it's queued and framed.
#[derive(Clone, Copy, Debug)]
pub struct SendFlags {
    /// Send even while the datacenter is not yet marked configured. Needed
    /// to bootstrap the connection (e.g. the first config fetch) before
    /// ordinary traffic is allowed to flow.
    pub force_send: bool,
    /// Whether the message itself needs acknowledgment. False for things
    /// like the keepalive ping's own body.
    pub content_related: bool,
}

impl Default for SendFlags {
    fn default() -> Self {
        Self { force_send: false, content_related: true }
    }
}

struct Request {
    body: Vec<u8>,
    flags: SendFlags,
    state: RequestState,
    result: oneshot::Sender<Result<Vec<u8>, InvocationError>>,
}

enum RequestState {
    NotSerialized,
    Serialized(MsgId),
    Sent(MsgId),
}

/// Manages enqueuing requests, matching them to their responses, and the
/// network I/O that carries them. One `Sender` owns exactly one connection.
pub struct Sender<T: Transport, M: Mtp> {
    stream: NetStream,
    transport: T,
    mtp: M,
    addr: ServerAddr,
    requests: Vec<Request>,
    next_ping: Instant,
    /// Whether this datacenter has completed its own configuration fetch
    /// and is now allowed to carry ordinary (non-`force_send`) traffic.
    configured: bool,

    read_buffer: Vec<u8>,
    read_tail: usize,
    write_buffer: Vec<u8>,
    write_head: usize,
}

impl<T: Transport, M: Mtp> Sender<T, M> {
    /// Opens a new socket connection to `addr` with the given transport and
    /// MTP state. Does not perform the handshake; see [`connect`].
    pub async fn connect(transport: T, mtp: M, addr: ServerAddr) -> Result<Self, io::Error> {
        let stream = NetStream::connect(&addr).await?;
        Ok(Self {
            stream,
            transport,
            mtp,
            addr,
            requests: vec![],
            next_ping: Instant::now() + PING_DELAY,
            // Usable immediately; see `mark_configured`/`SendFlags::force_send`
            // for gating ordinary traffic behind a caller-driven bootstrap.
            configured: true,
            read_buffer: vec![0; MAXIMUM_DATA],
            read_tail: 0,
            write_buffer: Vec::new(),
            write_head: 0,
        })
    }

    /// Marks this datacenter as configured, allowing ordinary traffic
    /// (requests without `force_send`) to actually be transmitted.
    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Serializes `body` and enqueues it, driving [`Self::step`] until a
    /// response for it arrives.
    pub async fn invoke_raw(&mut self, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
        self.invoke_raw_with_flags(body, SendFlags::default()).await
    }

    pub async fn invoke_raw_with_flags(
        &mut self,
        body: Vec<u8>,
        flags: SendFlags,
    ) -> Result<Vec<u8>, InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue_with_flags(body, flags, tx)?;
        self.step_until_receive(rx).await
    }

    pub(crate) fn enqueue_body(&mut self, body: Vec<u8>, tx: oneshot::Sender<Result<Vec<u8>, InvocationError>>) {
        let _ = self.enqueue_with_flags(body, SendFlags::default(), tx);
    }

    pub(crate) fn enqueue_with_flags(
        &mut self,
        body: Vec<u8>,
        flags: SendFlags,
        tx: oneshot::Sender<Result<Vec<u8>, InvocationError>>,
    ) -> Result<(), InvocationError> {
        if body.len() > MAX_MESSAGE_BYTES {
            let _ = tx.send(Err(InvocationError::PayloadTooLarge { len: body.len() }));
            return Err(InvocationError::PayloadTooLarge { len: body.len() });
        }
        self.requests.push(Request { body, flags, state: RequestState::NotSerialized, result: tx });
        Ok(())
    }

    async fn step_until_receive(
        &mut self,
        mut rx: oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
    ) -> Result<Vec<u8>, InvocationError> {
        loop {
            self.step().await?;
            match rx.try_recv() {
                Ok(x) => break x,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Closed) => return Err(InvocationError::Dropped),
            }
        }
    }

    /// Steps network events, writing and reading at the same time.
    ///
    /// Returns the raw bytes of every spontaneous server message (update)
    /// observed during this step. On error the connection should be
    /// considered dead and a fresh `Sender` reconnected.
    pub async fn step(&mut self) -> Result<Vec<Vec<u8>>, ReadError> {
        self.try_fill_write();
        let write_len = self.write_buffer.len() - self.write_head;
        trace!("sending up to {write_len} bytes, reading from the network");

        let (mut reader, mut writer) = self.stream.split();
        let sleep = sleep_until(self.next_ping);

        let result = tokio::select! {
            n = reader.read(&mut self.read_buffer[self.read_tail..]) => {
                n.map_err(ReadError::Io).and_then(|n| self.on_net_read(n))
            }
            n = writer.write(&self.write_buffer[self.write_head..]), if !self.write_buffer.is_empty() => {
                n.map_err(ReadError::Io).map(|n| { self.on_net_write(n); Vec::new() })
            }
            _ = sleep => {
                self.on_ping_timeout();
                Ok(Vec::new())
            }
        };

        if let Err(err) = &result {
            self.on_error(err);
        }
        result
    }

    /// A request may be sent once its datacenter is configured, or the
    /// caller explicitly forced it through (used to bootstrap the
    /// configuration fetch itself).
    fn ready_to_send(&self, request: &Request) -> bool {
        matches!(request.state, RequestState::NotSerialized) && (self.configured || request.flags.force_send)
    }

    fn try_fill_write(&mut self) {
        if !self.write_buffer.is_empty() {
            return;
        }

        let pending: Vec<OutboundMessage> = self
            .requests
            .iter()
            .filter(|r| self.ready_to_send(r))
            .map(|r| OutboundMessage { body: r.body.clone(), content_related: r.flags.content_related })
            .collect();
        if pending.is_empty() {
            return;
        }

        let mut envelope = Vec::new();
        let ids = self.mtp.serialize(&pending, &mut envelope);

        let mut assigned = ids.into_iter();
        let configured = self.configured;
        for request in self.requests.iter_mut().filter(|r| {
            matches!(r.state, RequestState::NotSerialized) && (configured || r.flags.force_send)
        }) {
            if let Some(id) = assigned.next() {
                debug!("serialized request with {id:?}");
                request.state = RequestState::Serialized(id);
            }
        }

        let mut ring = RingBuffer::with_capacity(envelope.len() + 4, 4);
        ring.extend(envelope);
        self.transport.pack(&mut ring);
        self.write_buffer = ring.as_ref().to_vec();
        self.write_head = 0;
    }

    fn on_net_read(&mut self, n: usize) -> Result<Vec<Vec<u8>>, ReadError> {
        if n == 0 {
            return Err(ReadError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "read 0 bytes")));
        }

        self.read_tail += n;
        trace!("read {n} bytes from the network");

        let mut updates = Vec::new();
        let mut next_offset = 0;
        while next_offset != self.read_tail {
            match self.transport.unpack(&self.read_buffer[next_offset..self.read_tail]) {
                Ok(offset) => {
                    let frame_start = next_offset + offset.data_start;
                    let frame_end = next_offset + offset.data_end;
                    if frame_end - frame_start > MAX_RESPONSE_SIZE {
                        warn!("discarding oversized inbound frame ({} bytes)", frame_end - frame_start);
                        next_offset += offset.next_offset;
                        continue;
                    }
                    let result = self.mtp.deserialize(&self.read_buffer[frame_start..frame_end])?;
                    self.process_mtp_result(result, &mut updates);
                    next_offset += offset.next_offset;
                }
                Err(transport::Error::MissingBytes) => break,
                Err(err) => return Err(err.into()),
            }
        }

        self.read_buffer.copy_within(next_offset..self.read_tail, 0);
        self.read_tail -= next_offset;

        Ok(updates)
    }

    fn on_net_write(&mut self, n: usize) {
        self.write_head += n;
        trace!("written {} / {} bytes", self.write_head, self.write_buffer.len());
        if self.write_head != self.write_buffer.len() {
            return;
        }

        self.write_buffer.clear();
        self.write_head = 0;
        for req in self.requests.iter_mut() {
            if let RequestState::Serialized(id) = req.state {
                req.state = RequestState::Sent(id);
            }
        }
    }

    fn on_ping_timeout(&mut self) {
        let ping_id = generate_random_id();
        debug!("enqueueing keepalive ping {ping_id}");
        let (tx, _rx) = oneshot::channel();
        self.enqueue_body(ping_delay_disconnect_body(ping_id, NO_PING_DISCONNECT), tx);
        self.next_ping = Instant::now() + PING_DELAY;
    }

    fn on_error(&mut self, error: &ReadError) {
        warn!("marking all {} request(s) as failed: {error}", self.requests.len());
        self.requests.drain(..).for_each(|r| drop(r.result.send(Err(InvocationError::from(error.clone())))));
    }

    fn process_mtp_result(&mut self, result: Deserialization, updates: &mut Vec<Vec<u8>>) {
        for (msg_id, response) in result.rpc_results {
            if let Some(req) = self.pop_request(msg_id) {
                drop(req.result.send(response.map_err(Into::into)));
            } else {
                info!("got rpc result for {msg_id:?} but no such request is tracked");
            }
        }

        for msg_id in result.retries {
            if let Some(req) = self.requests.iter_mut().find(|r| matches!(r.state, RequestState::Sent(id) if id == msg_id)) {
                debug!("re-sending request {msg_id:?} under a fresh msg_id");
                req.state = RequestState::NotSerialized;
            } else {
                info!("asked to retry {msg_id:?} but no such request is tracked");
            }
        }

        if let Some(first_msg_id) = result.regenerate_below {
            for req in self.requests.iter_mut() {
                if let RequestState::Sent(MsgId(id)) = req.state {
                    if id < first_msg_id {
                        debug!("re-queuing request {id} predating the new session");
                        req.state = RequestState::NotSerialized;
                    }
                }
            }
        }

        updates.extend(result.updates);
    }

    fn pop_request(&mut self, msg_id: MsgId) -> Option<Request> {
        self.requests.iter().position(|r| matches!(r.state, RequestState::Sent(id) if id == msg_id)).map(|i| self.requests.swap_remove(i))
    }
}

impl<T: Transport> Sender<T, mtp::Encrypted> {
    /// The authorization key backing this connection, for persisting
    /// across a reconnect.
    pub fn auth_key(&self) -> [u8; 256] {
        self.mtp.auth_key().to_bytes()
    }
}

/// Connects a plain transport and drives [`generate_auth_key`] on it.
pub async fn connect<T: Transport>(transport: T, addr: ServerAddr) -> Result<Sender<T, mtp::Encrypted>, InvocationError> {
    let sender = Sender::connect(transport, mtp::Plain::new(), addr).await?;
    generate_auth_key(sender).await
}

/// Drives the authorization key handshake over a plaintext sender, and
/// returns an encrypted sender reusing the same connection and buffers.
pub async fn generate_auth_key<T: Transport>(
    mut sender: Sender<T, mtp::Plain>,
) -> Result<Sender<T, mtp::Encrypted>, InvocationError> {
    info!("generating new authorization key...");
    let (request, data) = authentication::step1();
    let response = sender.invoke_raw(request).await?;
    let (request, data) = authentication::step2(data, &response)?;
    let response = sender.invoke_raw(request).await?;
    let (request, data) = authentication::step3(data, &response, now_secs())?;
    let response = sender.invoke_raw(request).await?;

    let mut data = data;
    let mut response = response;
    let finished = loop {
        match authentication::create_key(data, &response)? {
            authentication::Outcome::Finished(finished) => break finished,
            authentication::Outcome::Retry(request, retry_data) => {
                response = sender.invoke_raw(request).await?;
                data = retry_data;
            }
        }
    };
    info!("authorization key generated successfully");

    Ok(Sender {
        stream: sender.stream,
        transport: sender.transport,
        mtp: mtp::Encrypted::build()
            .salt(finished.first_salt)
            .finish(finished.auth_key.0),
        requests: sender.requests,
        next_ping: Instant::now() + PING_DELAY,
        // A caller that wants to gate ordinary traffic behind its own
        // configuration fetch can flip this back to `false` right after
        // this call returns and force that fetch through with
        // `SendFlags::force_send`; by default a freshly keyed session is
        // usable right away.
        configured: true,
        read_buffer: sender.read_buffer,
        read_tail: sender.read_tail,
        write_buffer: sender.write_buffer,
        write_head: sender.write_head,
        addr: sender.addr,
    })
}

/// Connects an encrypted transport reusing a previously generated key.
pub async fn connect_with_auth<T: Transport>(
    transport: T,
    addr: ServerAddr,
    auth_key: [u8; 256],
) -> Result<Sender<T, mtp::Encrypted>, io::Error> {
    Sender::connect(transport, mtp::Encrypted::build().finish(auth_key), addr).await
}

fn now_secs() -> i32 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).expect("system clock before epoch").as_secs() as i32
}
