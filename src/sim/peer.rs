//! Remote peers connecting into device servers.
//!
//! A peer is the client side of a TCP connection the world opens to a
//! listening [`TcpServer`](crate::net::TcpServer).  Whatever the device
//! sends on the accepted socket accumulates in the peer until taken.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use log::debug;

use crate::device::Device;
use crate::events::{NetId, Task};
use crate::net::{Link, LwipError, Notice, interface_ip, server};

/// First source port used by remote peers.
const PEER_PORT_FIRST: u16 = 40_000;

struct PeerState {
    sock: NetId,
    open: bool,
    received: Vec<u8>,
}

pub(crate) struct PeerTable {
    peers: HashMap<u32, PeerState>,
    next_id: u32,
    client_ip: Ipv4Addr,
    next_port: u16,
}

impl PeerTable {
    pub(crate) fn new(client_ip: Ipv4Addr) -> Self {
        Self { peers: HashMap::new(), next_id: 0, client_ip, next_port: PEER_PORT_FIRST }
    }

    pub(crate) fn receive(&mut self, id: u32, data: &[u8]) {
        if let Some(p) = self.peers.get_mut(&id).filter(|p| p.open) {
            p.received.extend_from_slice(data);
        }
    }

    pub(crate) fn closed(&mut self, id: u32) {
        if let Some(p) = self.peers.get_mut(&id) {
            p.open = false;
        }
    }

    pub(crate) fn close_all(&mut self) {
        for p in self.peers.values_mut() {
            p.open = false;
        }
    }

    fn next_addr(&mut self) -> SocketAddrV4 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(PEER_PORT_FIRST);
        SocketAddrV4::new(self.client_ip, port)
    }
}

/// Handle to a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemotePeer(u32);

/// Open a connection to the device's server on `port`.  `None` when
/// nothing listens there or the device has no address.
pub fn connect_peer(dev: &mut Device, port: u16) -> Option<RemotePeer> {
    let ip = interface_ip(dev)?;
    let local = SocketAddrV4::new(ip, port);
    let srv = server::find_listener(dev, local)?;

    let id = dev.world.peers.next_id;
    dev.world.peers.next_id += 1;
    let from = dev.world.peers.next_addr();
    let sock = server::open_connection(dev, srv, local, from, Link::Peer(id));
    dev.world.peers.peers.insert(id, PeerState { sock, open: true, received: Vec::new() });
    debug!("sim: peer {id} connected from {from}");
    Some(RemotePeer(id))
}

impl RemotePeer {
    fn state(self, dev: &Device) -> Option<&PeerState> {
        dev.world.peers.peers.get(&self.0)
    }

    pub fn is_open(self, dev: &Device) -> bool {
        self.state(dev).is_some_and(|p| p.open)
    }

    /// Send bytes to the device; they arrive framed to the TCP MSS.
    pub fn send(self, dev: &mut Device, data: &[u8]) -> bool {
        let Some(sock) = self.state(dev).filter(|p| p.open).map(|p| p.sock) else {
            return false;
        };
        let latency = dev.cfg.timing.net_latency_ms;
        let mss = usize::from(dev.cfg.device.tcp_mss);
        for chunk in data.chunks(mss) {
            dev.post_ms(latency, Task::Deliver { sock, frame: chunk.to_vec(), from: None });
        }
        true
    }

    /// Everything the device sent since the last call.
    pub fn take_received(self, dev: &mut Device) -> Vec<u8> {
        dev.world
            .peers
            .peers
            .get_mut(&self.0)
            .map(|p| std::mem::take(&mut p.received))
            .unwrap_or_default()
    }

    /// Orderly close; the device sees `disconnection`.
    pub fn close(self, dev: &mut Device) {
        self.hang_up(dev, Notice::Disconnection(None));
    }

    /// Abortive close; the device sees `reconnection` with a reset error.
    pub fn reset(self, dev: &mut Device) {
        self.hang_up(dev, Notice::Reconnection(LwipError::Reset));
    }

    fn hang_up(self, dev: &mut Device, notice: Notice) {
        let Some(p) = dev.world.peers.peers.get_mut(&self.0).filter(|p| p.open) else {
            return;
        };
        p.open = false;
        let sock = p.sock;
        let latency = dev.cfg.timing.net_latency_ms;
        dev.post_ms(latency, Task::Notify { sock, notice });
    }
}
