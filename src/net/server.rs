//! TCP servers.
//!
//! A server listens on one port and hands each accepted connection to its
//! accept callback as a regular [`Socket`].  Accepted connections that see
//! no traffic in either direction for the server timeout are closed with a
//! `disconnection` event.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use log::{debug, info, warn};

use super::{ConnState, Link, Notice, Socket, SocketKind, interface_ip, notify_partner};
use crate::device::Device;
use crate::error::{NetError, Result};
use crate::events::{NetId, Task};

pub const DEFAULT_SERVER_TIMEOUT_S: u32 = 30;
pub const MAX_SERVER_TIMEOUT_S: u32 = 28_800;

/// Handle to a TCP server owned by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpServer(pub(crate) NetId);

pub type AcceptCallback = Rc<RefCell<dyn FnMut(&mut Device, Socket)>>;

pub(crate) struct ServerEntry {
    pub(crate) local: Option<SocketAddrV4>,
    timeout_s: u32,
    on_accept: Option<AcceptCallback>,
}

/// Create a server whose connections time out after `timeout_s` idle
/// seconds (1..=28800).
pub fn create_server(dev: &mut Device, timeout_s: u32) -> Result<TcpServer> {
    if !(1..=MAX_SERVER_TIMEOUT_S).contains(&timeout_s) {
        return Err(NetError::TimeoutOutOfRange(timeout_s).into());
    }
    let id = dev.net.alloc_id();
    dev.net.servers.insert(id, ServerEntry { local: None, timeout_s, on_accept: None });
    Ok(TcpServer(id))
}

impl TcpServer {
    /// Listen on `port`, on `ip` or the current interface address.  False
    /// if already listening or the port is taken.
    pub fn listen(
        self,
        dev: &mut Device,
        port: u16,
        ip: Option<Ipv4Addr>,
        on_accept: impl FnMut(&mut Device, Socket) + 'static,
    ) -> bool {
        if !dev.net.servers.get(&self.0).is_some_and(|s| s.local.is_none()) {
            warn!("net: server {} already listening or closed", self.0);
            return false;
        }
        let port = if port == 0 { dev.net.ephemeral_port(SocketKind::Tcp) } else { port };
        if dev.net.port_in_use(SocketKind::Tcp, port) {
            warn!("net: TCP port {port} in use");
            return false;
        }
        let ip = ip.or_else(|| interface_ip(dev)).unwrap_or(Ipv4Addr::UNSPECIFIED);
        let Some(entry) = dev.net.servers.get_mut(&self.0) else {
            return false;
        };
        entry.local = Some(SocketAddrV4::new(ip, port));
        entry.on_accept = Some(Rc::new(RefCell::new(on_accept)));
        info!("net: server listening on {ip}:{port}");
        true
    }

    /// Stop listening.  Established connections stay up.
    pub fn close(self, dev: &mut Device) {
        if let Some(entry) = dev.net.servers.get_mut(&self.0) {
            entry.local = None;
            entry.on_accept = None;
        }
    }

    pub fn getaddr(self, dev: &Device) -> Option<SocketAddrV4> {
        dev.net.servers.get(&self.0)?.local
    }
}

/// Server listening on `addr`, if any.
pub(crate) fn find_listener(dev: &Device, addr: SocketAddrV4) -> Option<NetId> {
    dev.net.servers.iter().find_map(|(id, s)| {
        let local = s.local?;
        let ip_matches = local.ip().is_unspecified()
            || local.ip() == addr.ip()
            || addr.ip().is_loopback();
        (local.port() == addr.port() && ip_matches).then_some(*id)
    })
}

/// Create the server-side socket for an incoming connection and queue its
/// accept callback.
pub(crate) fn open_connection(
    dev: &mut Device,
    srv: NetId,
    local: SocketAddrV4,
    peer: SocketAddrV4,
    link: Link,
) -> NetId {
    let timeout_s = dev.net.servers.get(&srv).map_or(DEFAULT_SERVER_TIMEOUT_S, |s| s.timeout_s);
    let conn = dev.net.insert(SocketKind::Tcp);
    if let Some(entry) = dev.net.sockets.get_mut(&conn) {
        entry.state = ConnState::Connected;
        entry.local = Some(local);
        entry.peer = Some(peer);
        entry.link = link;
        entry.accepted_by = Some(srv);
        entry.idle_timeout_s = Some(timeout_s);
    }
    debug!("net: server {srv} accepted {peer}");
    dev.post_now(Task::Accept { server: srv, sock: conn });
    touch(dev, conn);
    conn
}

pub(crate) fn deliver_accept(dev: &mut Device, server: NetId, sock: NetId) {
    let Some(cb) = dev.net.servers.get(&server).and_then(|s| s.on_accept.clone()) else {
        return;
    };
    (&mut *cb.borrow_mut())(dev, Socket(sock));
}

/// Record traffic on an accepted connection, pushing its idle deadline out.
/// The check already on the timeline picks up the new deadline when it
/// fires.
pub(crate) fn touch(dev: &mut Device, sock: NetId) {
    let now = dev.now_us();
    let Some(entry) = dev.net.sockets.get_mut(&sock) else {
        return;
    };
    let Some(timeout_s) = entry.idle_timeout_s else {
        return;
    };
    let timeout_us = u64::from(timeout_s) * 1_000_000;
    entry.idle_deadline_us = now.saturating_add(timeout_us);
    if !entry.idle_check_posted {
        entry.idle_check_posted = true;
        dev.post(timeout_us, Task::IdleCheck { sock });
    }
}

pub(crate) fn idle_check(dev: &mut Device, sock: NetId) {
    let now = dev.now_us();
    let Some(entry) = dev.net.sockets.get_mut(&sock) else {
        return;
    };
    entry.idle_check_posted = false;
    if entry.state != ConnState::Connected {
        return;
    }
    if entry.idle_deadline_us > now {
        entry.idle_check_posted = true;
        let remaining = entry.idle_deadline_us - now;
        dev.post(remaining, Task::IdleCheck { sock });
        return;
    }
    info!("net: closing idle connection {sock}");
    let link = entry.link;
    dev.post_now(Task::Notify { sock, notice: Notice::Disconnection(None) });
    notify_partner(dev, link);
}
