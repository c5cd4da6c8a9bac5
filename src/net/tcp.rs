//! TCP client side: connect and send.

use std::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, warn};

use super::{
    ConnState, Link, LwipError, Notice, Socket, SocketKind, dns, fire_dns, interface_ip,
    is_local, post_reply, server, service_context,
};
use crate::device::Device;
use crate::events::{NetId, Task};

impl Socket {
    /// Connect to `host:port`.  `host` is a dotted quad or a name, which is
    /// resolved first (firing the socket's `dns` callback).
    ///
    /// The outcome arrives as `connection` or `reconnection(err)`.  Returns
    /// false only when the socket cannot start a connection at all.
    pub fn connect(self, dev: &mut Device, port: u16, host: &str) -> bool {
        let Some(entry) = dev.net.sockets.get(&self.0) else {
            return false;
        };
        if entry.kind != SocketKind::Tcp {
            warn!("net: connect on a UDP socket");
            return false;
        }
        if matches!(entry.state, ConnState::Connecting | ConnState::Connected) {
            warn!("net: socket {} already connecting or connected", self.0);
            return false;
        }

        let literal = host.parse::<Ipv4Addr>().ok();
        let local_ip = if literal.is_some_and(|ip| ip.is_loopback()) {
            Some(Ipv4Addr::LOCALHOST)
        } else {
            interface_ip(dev)
        };
        let local = local_ip.map(|ip| SocketAddrV4::new(ip, dev.net.ephemeral_port(SocketKind::Tcp)));

        let Some(entry) = dev.net.sockets.get_mut(&self.0) else {
            return false;
        };
        entry.state = ConnState::Connecting;
        entry.local = local;
        entry.peer = None;
        entry.link = Link::None;
        entry.in_flight = false;

        let sock = self.0;
        if local.is_none() {
            debug!("net: no interface address, connect to {host} fails");
            dev.post_now(Task::Notify { sock, notice: Notice::Reconnection(LwipError::Routing) });
            return true;
        }
        match literal {
            Some(ip) => {
                let latency = dev.cfg.timing.net_latency_ms;
                dev.post_ms(latency, Task::TcpConnect { sock, addr: SocketAddrV4::new(ip, port) });
            }
            None => dns::lookup(dev, host, Box::new(move |dev, ip| resolved(dev, sock, port, ip))),
        }
        true
    }

    /// Queue `data` on a connected socket.  False while unconnected or while
    /// the previous send still awaits its `sent`.
    pub fn send(self, dev: &mut Device, data: &[u8]) -> bool {
        let Some(entry) = dev.net.sockets.get_mut(&self.0) else {
            return false;
        };
        if entry.kind != SocketKind::Tcp || entry.state != ConnState::Connected {
            warn!("net: send on unconnected socket {}", self.0);
            return false;
        }
        if entry.in_flight {
            warn!("net: send on socket {} before previous sent, rejected", self.0);
            return false;
        }
        entry.in_flight = true;
        let latency = dev.cfg.timing.net_latency_ms;
        dev.post_ms(latency, Task::Transmit { sock: self.0, to: None, data: data.to_vec() });
        server::touch(dev, self.0);
        true
    }
}

fn connecting(dev: &Device, sock: NetId) -> bool {
    dev.net.sockets.get(&sock).is_some_and(|s| s.state == ConnState::Connecting)
}

fn resolved(dev: &mut Device, sock: NetId, port: u16, ip: Option<Ipv4Addr>) {
    if !connecting(dev, sock) {
        return;
    }
    fire_dns(dev, sock, ip);
    if !connecting(dev, sock) {
        return;
    }
    match ip {
        Some(ip) => {
            let latency = dev.cfg.timing.net_latency_ms;
            dev.post_ms(latency, Task::TcpConnect { sock, addr: SocketAddrV4::new(ip, port) });
        }
        None => dev.post_now(Task::Notify { sock, notice: Notice::Reconnection(LwipError::Aborted) }),
    }
}

/// The SYN reaches `addr`.
pub(crate) fn arrive_connect(dev: &mut Device, sock: NetId, addr: SocketAddrV4) {
    let Some(entry) = dev.net.sockets.get(&sock) else {
        return;
    };
    if entry.state != ConnState::Connecting {
        return;
    }
    let Some(local) = entry.local else {
        return;
    };

    if is_local(dev, *addr.ip()) {
        let Some(srv) = server::find_listener(dev, addr) else {
            debug!("net: nothing listening on {addr}");
            refuse(dev, sock);
            return;
        };
        let conn = server::open_connection(dev, srv, addr, local, Link::Loopback(sock));
        establish(dev, sock, addr, Link::Loopback(conn));
        return;
    }

    let ctx = service_context(dev);
    let Some(service) = dev.world.service_mut(SocketKind::Tcp, addr) else {
        debug!("net: no host at {addr}");
        refuse(dev, sock);
        return;
    };
    let reply = service.on_connect(&ctx, local);
    establish(dev, sock, addr, Link::Service(addr));
    post_reply(dev, sock, SocketKind::Tcp, reply, None);
}

fn refuse(dev: &mut Device, sock: NetId) {
    dev.post_now(Task::Notify { sock, notice: Notice::Reconnection(LwipError::Reset) });
}

fn establish(dev: &mut Device, sock: NetId, peer: SocketAddrV4, link: Link) {
    if let Some(entry) = dev.net.sockets.get_mut(&sock) {
        entry.state = ConnState::Connected;
        entry.peer = Some(peer);
        entry.link = link;
    }
    dev.post_now(Task::Notify { sock, notice: Notice::Connection });
}

/// Carry one send to the other end of the connection.
pub(crate) fn carry(
    dev: &mut Device,
    sock: NetId,
    link: Link,
    local: Option<SocketAddrV4>,
    data: &[u8],
) {
    match link {
        Link::Loopback(other) => {
            let mss = usize::from(dev.cfg.device.tcp_mss);
            for chunk in data.chunks(mss) {
                dev.post_now(Task::Deliver { sock: other, frame: chunk.to_vec(), from: None });
            }
        }
        Link::Service(addr) => {
            let Some(local) = local else {
                return;
            };
            let ctx = service_context(dev);
            let Some(service) = dev.world.service_mut(SocketKind::Tcp, addr) else {
                return;
            };
            let reply = service.on_data(&ctx, local, data);
            post_reply(dev, sock, SocketKind::Tcp, reply, None);
        }
        Link::Peer(id) => dev.world.peer_receive(id, data),
        Link::None => {}
    }
}
