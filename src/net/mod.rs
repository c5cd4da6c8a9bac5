//! Network module: TCP client sockets, TCP servers, UDP sockets and DNS.
//!
//! ```text
//!   Socket::send ──▶ Transmit (after latency) ──┬─▶ loopback peer: Deliver
//!                                               ├─▶ world service: reply Deliver
//!                                               └─▶ remote peer inbox
//!                                    then ──▶ Notify(Sent)
//! ```
//!
//! Flow control is one chunk per `sent`: a send is refused while the
//! previous one is still in flight, and every accepted send yields exactly
//! one `sent` callback.  Inbound TCP payloads are cut into MSS-sized frames
//! and each frame fires `receive` once.
//!
//! A closed socket has no addresses and ignores late traffic.  Closed TCP
//! client sockets stay in the stack because `connect` may reuse them; closed
//! UDP sockets and closed server-side connections are dead for good and are
//! pruned the next time a socket is created.  Their handles keep reporting
//! `Closed`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use core::fmt;
use log::{debug, warn};

use crate::device::Device;
use crate::events::{NetId, Task};
use crate::ports::{ServiceContext, ServiceReply};
use crate::wifi;

pub mod dns;
pub mod server;
pub mod tcp;
pub mod udp;

pub use server::{
    DEFAULT_SERVER_TIMEOUT_S, MAX_SERVER_TIMEOUT_S, TcpServer, create_server,
};

pub const DEFAULT_TTL: u8 = 255;
const EPHEMERAL_FIRST: u16 = 49152;

// ───────────────────────────────────────────────────────────────
// Public types
// ───────────────────────────────────────────────────────────────

/// Handle to a TCP or UDP socket owned by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Socket(pub(crate) NetId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Tcp,
    Udp,
}

/// TCP connection state.  UDP sockets stay `Unconnected` until closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    Connection,
    Reconnection,
    Disconnection,
    Receive,
    Sent,
    Dns,
}

impl SocketEvent {
    fn tcp_only(self) -> bool {
        matches!(self, Self::Connection | Self::Reconnection | Self::Disconnection)
    }
}

/// lwIP error codes reported by `reconnection` and `disconnection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum LwipError {
    OutOfMemory = -1,
    Buffer = -2,
    Timeout = -3,
    Routing = -4,
    InProgress = -5,
    IllegalValue = -6,
    WouldBlock = -7,
    AddressInUse = -8,
    Already = -9,
    IsConnected = -10,
    NotConnected = -11,
    LowLevelInterface = -12,
    Aborted = -13,
    Reset = -14,
    Closed = -15,
    IllegalArgument = -16,
}

impl LwipError {
    pub fn code(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for LwipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// Callback for one [`SocketEvent`].  Build with the constructor named
/// after the event.
#[derive(Clone)]
pub enum SocketCallback {
    Connection(Rc<RefCell<dyn FnMut(&mut Device, Socket)>>),
    Reconnection(Rc<RefCell<dyn FnMut(&mut Device, Socket, LwipError)>>),
    Disconnection(Rc<RefCell<dyn FnMut(&mut Device, Socket, Option<LwipError>)>>),
    Receive(Rc<RefCell<dyn FnMut(&mut Device, Socket, &[u8], Option<SocketAddrV4>)>>),
    Sent(Rc<RefCell<dyn FnMut(&mut Device, Socket)>>),
    Dns(Rc<RefCell<dyn FnMut(&mut Device, Socket, Option<Ipv4Addr>)>>),
}

impl SocketCallback {
    pub fn connection(f: impl FnMut(&mut Device, Socket) + 'static) -> Self {
        Self::Connection(Rc::new(RefCell::new(f)))
    }

    pub fn reconnection(f: impl FnMut(&mut Device, Socket, LwipError) + 'static) -> Self {
        Self::Reconnection(Rc::new(RefCell::new(f)))
    }

    pub fn disconnection(f: impl FnMut(&mut Device, Socket, Option<LwipError>) + 'static) -> Self {
        Self::Disconnection(Rc::new(RefCell::new(f)))
    }

    /// The sender address is set for UDP and `None` for TCP.
    pub fn receive(
        f: impl FnMut(&mut Device, Socket, &[u8], Option<SocketAddrV4>) + 'static,
    ) -> Self {
        Self::Receive(Rc::new(RefCell::new(f)))
    }

    pub fn sent(f: impl FnMut(&mut Device, Socket) + 'static) -> Self {
        Self::Sent(Rc::new(RefCell::new(f)))
    }

    pub fn dns(f: impl FnMut(&mut Device, Socket, Option<Ipv4Addr>) + 'static) -> Self {
        Self::Dns(Rc::new(RefCell::new(f)))
    }

    pub fn event(&self) -> SocketEvent {
        match self {
            Self::Connection(_) => SocketEvent::Connection,
            Self::Reconnection(_) => SocketEvent::Reconnection,
            Self::Disconnection(_) => SocketEvent::Disconnection,
            Self::Receive(_) => SocketEvent::Receive,
            Self::Sent(_) => SocketEvent::Sent,
            Self::Dns(_) => SocketEvent::Dns,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Stack state
// ───────────────────────────────────────────────────────────────

/// Connection-level notifications delivered through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    Connection,
    Reconnection(LwipError),
    Disconnection(Option<LwipError>),
    Sent,
}

impl Notice {
    fn event(self) -> SocketEvent {
        match self {
            Self::Connection => SocketEvent::Connection,
            Self::Reconnection(_) => SocketEvent::Reconnection,
            Self::Disconnection(_) => SocketEvent::Disconnection,
            Self::Sent => SocketEvent::Sent,
        }
    }
}

/// Where a TCP socket's outbound bytes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    None,
    /// The other end is a socket on this device.
    Loopback(NetId),
    /// A world service at this address.
    Service(SocketAddrV4),
    /// A scripted remote peer.
    Peer(u32),
}

pub(crate) struct SocketEntry {
    pub(crate) kind: SocketKind,
    pub(crate) state: ConnState,
    pub(crate) local: Option<SocketAddrV4>,
    pub(crate) peer: Option<SocketAddrV4>,
    ttl: u8,
    callbacks: HashMap<SocketEvent, SocketCallback>,
    held: bool,
    backlog: VecDeque<(Vec<u8>, Option<SocketAddrV4>)>,
    pub(crate) in_flight: bool,
    pub(crate) link: Link,
    /// Idle timeout for connections accepted by a server.
    pub(crate) idle_timeout_s: Option<u32>,
    pub(crate) accepted_by: Option<NetId>,
    /// Counter time at which an idle accepted connection is closed.
    pub(crate) idle_deadline_us: u64,
    /// An `IdleCheck` for this socket is on the timeline.
    pub(crate) idle_check_posted: bool,
}

impl SocketEntry {
    fn new(kind: SocketKind) -> Self {
        Self {
            kind,
            state: ConnState::Unconnected,
            local: None,
            peer: None,
            ttl: DEFAULT_TTL,
            callbacks: HashMap::new(),
            held: false,
            backlog: VecDeque::new(),
            in_flight: false,
            link: Link::None,
            idle_timeout_s: None,
            accepted_by: None,
            idle_deadline_us: 0,
            idle_check_posted: false,
        }
    }

    fn mark_closed(&mut self) {
        self.state = ConnState::Closed;
        self.local = None;
        self.peer = None;
        self.in_flight = false;
        self.held = false;
        self.backlog.clear();
        self.link = Link::None;
    }

    fn is_open(&self) -> bool {
        self.state != ConnState::Closed
    }

    /// Closed and never usable again.
    fn is_dead(&self) -> bool {
        !self.is_open() && (self.kind == SocketKind::Udp || self.accepted_by.is_some())
    }
}

#[derive(Default)]
pub(crate) struct NetStack {
    pub(crate) sockets: HashMap<NetId, SocketEntry>,
    pub(crate) servers: HashMap<NetId, server::ServerEntry>,
    next_id: NetId,
    next_port: u16,
    pub(crate) dns_servers: [Option<Ipv4Addr>; 2],
    pub(crate) dns_manual: [bool; 2],
}

impl NetStack {
    pub(crate) fn alloc_id(&mut self) -> NetId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(&mut self, kind: SocketKind) -> NetId {
        self.sockets.retain(|_, s| !s.is_dead());
        let id = self.alloc_id();
        self.sockets.insert(id, SocketEntry::new(kind));
        id
    }

    pub(crate) fn port_in_use(&self, kind: SocketKind, port: u16) -> bool {
        let socket_uses = self.sockets.values().any(|s| {
            s.kind == kind
                && s.is_open()
                && s.accepted_by.is_none()
                && s.local.is_some_and(|a| a.port() == port)
        });
        let server_uses = kind == SocketKind::Tcp
            && self.servers.values().any(|s| s.local.is_some_and(|a| a.port() == port));
        socket_uses || server_uses
    }

    /// Next free port in the IANA dynamic range.
    pub(crate) fn ephemeral_port(&mut self, kind: SocketKind) -> u16 {
        let span = u32::from(u16::MAX - EPHEMERAL_FIRST) + 1;
        for _ in 0..span {
            if self.next_port < EPHEMERAL_FIRST {
                self.next_port = EPHEMERAL_FIRST;
            }
            let port = self.next_port;
            self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_FIRST);
            if !self.port_in_use(kind, port) {
                return port;
            }
        }
        warn!("net: ephemeral ports exhausted");
        EPHEMERAL_FIRST
    }
}

// ───────────────────────────────────────────────────────────────
// Constructors and common socket operations
// ───────────────────────────────────────────────────────────────

/// New TCP client socket.
pub fn create_connection(dev: &mut Device) -> Socket {
    Socket(dev.net.insert(SocketKind::Tcp))
}

pub fn create_udp_socket(dev: &mut Device) -> Socket {
    Socket(dev.net.insert(SocketKind::Udp))
}

impl Socket {
    pub fn kind(self, dev: &Device) -> Option<SocketKind> {
        dev.net.sockets.get(&self.0).map(|s| s.kind)
    }

    /// `None` only for a handle this device never issued.
    pub fn state(self, dev: &Device) -> Option<ConnState> {
        match dev.net.sockets.get(&self.0) {
            Some(s) => Some(s.state),
            None => (self.0 < dev.net.next_id).then_some(ConnState::Closed),
        }
    }

    /// Install (`Some`) or remove (`None`) the callback for `event`.
    ///
    /// False when the callback was built for another event, or the event
    /// does not exist for this socket kind.
    pub fn on(self, dev: &mut Device, event: SocketEvent, callback: Option<SocketCallback>) -> bool {
        let Some(entry) = dev.net.sockets.get_mut(&self.0) else {
            return false;
        };
        if entry.kind == SocketKind::Udp && event.tcp_only() {
            warn!("net: {:?} is not a UDP event", event);
            return false;
        }
        match callback {
            Some(cb) if cb.event() != event => {
                warn!("net: {:?} callback registered for {:?}", cb.event(), event);
                false
            }
            Some(cb) => {
                entry.callbacks.insert(event, cb);
                true
            }
            None => {
                entry.callbacks.remove(&event);
                true
            }
        }
    }

    /// Close the socket.  Its own `disconnection` does not fire; a loopback
    /// or remote peer sees the connection drop.
    pub fn close(self, dev: &mut Device) {
        let Some(entry) = dev.net.sockets.get_mut(&self.0) else {
            return;
        };
        if !entry.is_open() {
            return;
        }
        let link = entry.link;
        entry.mark_closed();
        debug!("net: socket {} closed", self.0);
        notify_partner(dev, link);
    }

    /// Local address; `None` when unbound or closed.
    pub fn getaddr(self, dev: &Device) -> Option<SocketAddrV4> {
        dev.net.sockets.get(&self.0)?.local
    }

    /// Remote address; `None` when unconnected or closed.
    pub fn getpeer(self, dev: &Device) -> Option<SocketAddrV4> {
        dev.net.sockets.get(&self.0)?.peer
    }

    pub fn ttl(self, dev: &Device) -> Option<u8> {
        dev.net.sockets.get(&self.0).map(|s| s.ttl)
    }

    pub fn set_ttl(self, dev: &mut Device, ttl: u8) -> bool {
        match dev.net.sockets.get_mut(&self.0) {
            Some(s) if s.is_open() => {
                s.ttl = ttl;
                true
            }
            _ => false,
        }
    }

    /// Pause inbound delivery (TCP).  Frames queue until [`unhold`](Self::unhold).
    pub fn hold(self, dev: &mut Device) -> bool {
        match dev.net.sockets.get_mut(&self.0) {
            Some(s) if s.kind == SocketKind::Tcp && s.is_open() => {
                s.held = true;
                true
            }
            _ => false,
        }
    }

    /// Resume delivery; queued frames are delivered first, in order.
    pub fn unhold(self, dev: &mut Device) -> bool {
        let Some(s) = dev.net.sockets.get_mut(&self.0) else {
            return false;
        };
        if s.kind != SocketKind::Tcp || !s.is_open() {
            return false;
        }
        s.held = false;
        if !s.backlog.is_empty() {
            let sock = self.0;
            dev.post_now(Task::Call(Box::new(move |dev| flush_backlog(dev, sock))));
        }
        true
    }

    /// Resolve `host` and hand the answer to `callback`.  Dropped if the
    /// socket is closed before the answer arrives.
    pub fn dns(
        self,
        dev: &mut Device,
        host: &str,
        callback: impl FnOnce(&mut Device, Socket, Option<Ipv4Addr>) + 'static,
    ) -> bool {
        if !dev.net.sockets.get(&self.0).is_some_and(SocketEntry::is_open) {
            return false;
        }
        dns::lookup(
            dev,
            host,
            Box::new(move |dev, ip| {
                if dev.net.sockets.get(&self.0).is_some_and(SocketEntry::is_open) {
                    callback(dev, self, ip);
                }
            }),
        );
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Loop-side delivery
// ───────────────────────────────────────────────────────────────

fn callback(dev: &Device, sock: NetId, event: SocketEvent) -> Option<SocketCallback> {
    dev.net.sockets.get(&sock)?.callbacks.get(&event).cloned()
}

pub(crate) fn fire_dns(dev: &mut Device, sock: NetId, ip: Option<Ipv4Addr>) {
    if !dev.net.sockets.get(&sock).is_some_and(SocketEntry::is_open) {
        return;
    }
    if let Some(SocketCallback::Dns(f)) = callback(dev, sock, SocketEvent::Dns) {
        (&mut *f.borrow_mut())(dev, Socket(sock), ip);
    }
}

pub(crate) fn deliver_notice(dev: &mut Device, sock: NetId, notice: Notice) {
    let Some(entry) = dev.net.sockets.get_mut(&sock) else {
        return;
    };
    match notice {
        Notice::Connection => {
            if entry.state != ConnState::Connected {
                return;
            }
        }
        Notice::Reconnection(_) | Notice::Disconnection(_) => {
            if !entry.is_open() {
                return;
            }
            entry.mark_closed();
        }
        Notice::Sent => {
            entry.in_flight = false;
            if !entry.is_open() {
                return;
            }
        }
    }

    let Some(cb) = callback(dev, sock, notice.event()) else {
        return;
    };
    let s = Socket(sock);
    match (cb, notice) {
        (SocketCallback::Connection(f), _) | (SocketCallback::Sent(f), _) => {
            (&mut *f.borrow_mut())(dev, s);
        }
        (SocketCallback::Reconnection(f), Notice::Reconnection(err)) => {
            (&mut *f.borrow_mut())(dev, s, err);
        }
        (SocketCallback::Disconnection(f), Notice::Disconnection(err)) => {
            (&mut *f.borrow_mut())(dev, s, err);
        }
        _ => {}
    }
}

pub(crate) fn deliver_frame(
    dev: &mut Device,
    sock: NetId,
    frame: Vec<u8>,
    from: Option<SocketAddrV4>,
) {
    let Some(entry) = dev.net.sockets.get_mut(&sock) else {
        return;
    };
    if !entry.is_open() || (entry.kind == SocketKind::Udp && entry.local.is_none()) {
        debug!("net: frame for closed socket {sock} dropped");
        return;
    }
    if entry.held || !entry.backlog.is_empty() {
        entry.backlog.push_back((frame, from));
        return;
    }
    server::touch(dev, sock);
    receive(dev, sock, &frame, from);
}

fn receive(dev: &mut Device, sock: NetId, frame: &[u8], from: Option<SocketAddrV4>) {
    if let Some(SocketCallback::Receive(f)) = callback(dev, sock, SocketEvent::Receive) {
        (&mut *f.borrow_mut())(dev, Socket(sock), frame, from);
    }
}

fn flush_backlog(dev: &mut Device, sock: NetId) {
    loop {
        let Some(entry) = dev.net.sockets.get_mut(&sock) else {
            return;
        };
        if entry.held || !entry.is_open() {
            return;
        }
        let Some((frame, from)) = entry.backlog.pop_front() else {
            return;
        };
        server::touch(dev, sock);
        receive(dev, sock, &frame, from);
    }
}

pub(crate) fn transmit(dev: &mut Device, sock: NetId, to: Option<SocketAddrV4>, data: Vec<u8>) {
    let Some(entry) = dev.net.sockets.get(&sock) else {
        return;
    };
    if !entry.is_open() {
        return;
    }
    match entry.kind {
        SocketKind::Tcp => {
            let (link, local) = (entry.link, entry.local);
            tcp::carry(dev, sock, link, local, &data);
        }
        SocketKind::Udp => {
            let local = entry.local;
            if let (Some(local), Some(to)) = (local, to) {
                udp::carry(dev, sock, local, to, data);
            }
        }
    }
    dev.post_now(Task::Notify { sock, notice: Notice::Sent });
}

/// Tell the other end of `link` the connection is gone.
pub(crate) fn notify_partner(dev: &mut Device, link: Link) {
    match link {
        Link::Loopback(other) => {
            let latency = dev.cfg.timing.net_latency_ms;
            dev.post_ms(latency, Task::Notify { sock: other, notice: Notice::Disconnection(None) });
        }
        Link::Peer(id) => dev.world.peer_closed(id),
        Link::Service(_) | Link::None => {}
    }
}

/// Queue a world service's reply frames for `sock`.
pub(crate) fn post_reply(
    dev: &mut Device,
    sock: NetId,
    kind: SocketKind,
    reply: ServiceReply,
    from: Option<SocketAddrV4>,
) {
    let latency = dev.cfg.timing.net_latency_ms;
    let mss = usize::from(dev.cfg.device.tcp_mss);
    for frame in reply.frames {
        match kind {
            SocketKind::Tcp => {
                for chunk in frame.chunks(mss) {
                    dev.post_ms(latency, Task::Deliver { sock, frame: chunk.to_vec(), from: None });
                }
            }
            SocketKind::Udp => dev.post_ms(latency, Task::Deliver { sock, frame, from }),
        }
    }
    if reply.close && kind == SocketKind::Tcp {
        dev.post_ms(latency, Task::Notify { sock, notice: Notice::Disconnection(None) });
    }
}

pub(crate) fn service_context(dev: &Device) -> ServiceContext {
    ServiceContext { true_time_us: dev.true_time_us() }
}

/// Address of the interface traffic leaves from: the station lease when
/// there is one, else the soft-AP address.
pub(crate) fn interface_ip(dev: &Device) -> Option<Ipv4Addr> {
    wifi::sta::getip(dev)
        .or_else(|| wifi::ap::getip(dev))
        .map(|info| info.ip)
}

/// True for loopback and for any address this device owns.
pub(crate) fn is_local(dev: &Device, ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || wifi::sta::getip(dev).is_some_and(|i| i.ip == ip)
        || wifi::ap::getip(dev).is_some_and(|i| i.ip == ip)
}
