//! UDP sockets.
//!
//! A UDP socket is bound by `listen`, or implicitly to an ephemeral port on
//! its first `send_to`.  Datagrams arrive whole, with the sender address.

use std::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, info, warn};

use super::{ConnState, Socket, SocketKind, interface_ip, is_local, post_reply, service_context};
use crate::device::Device;
use crate::events::{NetId, Task};

impl Socket {
    /// Bind to `port` (0 picks an ephemeral port) on `ip` or the current
    /// interface address.
    pub fn listen(self, dev: &mut Device, port: u16, ip: Option<Ipv4Addr>) -> bool {
        match dev.net.sockets.get(&self.0) {
            Some(s) if s.kind == SocketKind::Udp && s.state != ConnState::Closed => {
                if s.local.is_some() {
                    warn!("net: UDP socket {} already bound", self.0);
                    return false;
                }
            }
            _ => return false,
        }
        let port = if port == 0 { dev.net.ephemeral_port(SocketKind::Udp) } else { port };
        if dev.net.port_in_use(SocketKind::Udp, port) {
            warn!("net: UDP port {port} in use");
            return false;
        }
        let ip = ip.or_else(|| interface_ip(dev)).unwrap_or(Ipv4Addr::UNSPECIFIED);
        if let Some(s) = dev.net.sockets.get_mut(&self.0) {
            s.local = Some(SocketAddrV4::new(ip, port));
        }
        info!("net: UDP listening on {ip}:{port}");
        true
    }

    /// Send one datagram.  False when closed, when there is no route, or
    /// while the previous datagram awaits its `sent`.
    pub fn send_to(self, dev: &mut Device, port: u16, ip: Ipv4Addr, data: &[u8]) -> bool {
        match dev.net.sockets.get(&self.0) {
            Some(s) if s.kind == SocketKind::Udp && s.state != ConnState::Closed => {
                if s.in_flight {
                    warn!("net: send on socket {} before previous sent, rejected", self.0);
                    return false;
                }
            }
            _ => return false,
        }
        let route = if ip.is_loopback() { Some(Ipv4Addr::LOCALHOST) } else { interface_ip(dev) };
        let Some(route) = route else {
            warn!("net: no route to {ip}");
            return false;
        };
        let needs_bind = dev.net.sockets.get(&self.0).is_some_and(|s| s.local.is_none());
        if needs_bind {
            let port = dev.net.ephemeral_port(SocketKind::Udp);
            if let Some(s) = dev.net.sockets.get_mut(&self.0) {
                s.local = Some(SocketAddrV4::new(route, port));
            }
        }
        if let Some(s) = dev.net.sockets.get_mut(&self.0) {
            s.in_flight = true;
        }
        let latency = dev.cfg.timing.net_latency_ms;
        let to = SocketAddrV4::new(ip, port);
        dev.post_ms(latency, Task::Transmit { sock: self.0, to: Some(to), data: data.to_vec() });
        true
    }
}

/// Open UDP socket bound to `addr`, if any.
pub(crate) fn find_bound(dev: &Device, addr: SocketAddrV4) -> Option<NetId> {
    dev.net.sockets.iter().find_map(|(id, s)| {
        if s.kind != SocketKind::Udp || s.state == ConnState::Closed {
            return None;
        }
        let local = s.local?;
        let ip_matches = local.ip().is_unspecified()
            || local.ip() == addr.ip()
            || addr.ip().is_loopback();
        (local.port() == addr.port() && ip_matches).then_some(*id)
    })
}

/// Carry one datagram from `from` to `to`.
pub(crate) fn carry(dev: &mut Device, sock: NetId, from: SocketAddrV4, to: SocketAddrV4, data: Vec<u8>) {
    if is_local(dev, *to.ip()) {
        match find_bound(dev, to) {
            Some(dst) => dev.post_now(Task::Deliver { sock: dst, frame: data, from: Some(from) }),
            None => debug!("net: nothing bound on {to}, datagram dropped"),
        }
        return;
    }
    let ctx = service_context(dev);
    let Some(service) = dev.world.service_mut(SocketKind::Udp, to) else {
        debug!("net: no host at {to}, datagram dropped");
        return;
    };
    let reply = service.on_data(&ctx, from, &data);
    post_reply(dev, sock, SocketKind::Udp, reply, Some(to));
}
