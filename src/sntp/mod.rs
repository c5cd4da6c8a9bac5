//! SNTP client.
//!
//! ```text
//!   sync ─▶ resolve every server ─▶ UDP socket ─▶ request #1 ─sent─▶ request #2 …
//!                 │                                   │
//!                 └─ none resolved: DnsLookup         ├─ first valid reply: rtctime::set, on_ok
//!                                                     └─ sntp_timeout_ms: Timeout
//! ```
//!
//! With autorepeat the whole round (DNS included) runs again every
//! [`AUTOREPEAT_S`] seconds until [`cancel_autorepeat`] or a reset.

pub mod packet;

use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use log::{debug, info, warn};

use self::packet::{MODE_SERVER, NTP_PORT, NtpPacket, NtpTimestamp};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::Task;
use crate::net::{self, Socket, SocketCallback, SocketEvent, dns};
use crate::rtc::time as rtctime;

/// Period of an autorepeating sync.
pub const AUTOREPEAT_S: u32 = 1000;

/// Failure codes passed to the error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SntpFailure {
    DnsLookup = 1,
    Memory = 2,
    UdpSend = 3,
    Timeout = 4,
}

impl fmt::Display for SntpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsLookup => write!(f, "DNS lookup failed"),
            Self::Memory => write!(f, "out of memory"),
            Self::UdpSend => write!(f, "UDP send failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of a successful round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub sec: u64,
    pub usec: u32,
    pub server: Ipv4Addr,
    /// Local clock error before the correction.
    pub offset_us: i64,
    /// Round-trip delay excluding server processing.
    pub delay_us: u64,
    pub stratum: u8,
}

pub type SyncHandler = Rc<RefCell<dyn FnMut(&mut Device, &SyncReport)>>;
pub type FailureHandler = Rc<RefCell<dyn FnMut(&mut Device, SntpFailure)>>;

/// Argument to [`sync`].
#[derive(Default)]
pub struct SyncRequest {
    servers: Vec<String>,
    on_ok: Option<SyncHandler>,
    on_err: Option<FailureHandler>,
    autorepeat: bool,
}

impl SyncRequest {
    /// Sync against the configured default servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names or dotted quads to query instead of the defaults.
    pub fn servers<S: AsRef<str>>(mut self, servers: &[S]) -> Self {
        self.servers = servers.iter().map(|s| s.as_ref().to_owned()).collect();
        self
    }

    pub fn on_success(mut self, f: impl FnMut(&mut Device, &SyncReport) + 'static) -> Self {
        self.on_ok = Some(Rc::new(RefCell::new(f)));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&mut Device, SntpFailure) + 'static) -> Self {
        self.on_err = Some(Rc::new(RefCell::new(f)));
        self
    }

    pub fn autorepeat(mut self, on: bool) -> Self {
        self.autorepeat = on;
        self
    }
}

struct Round {
    pending_dns: usize,
    addrs: Vec<Ipv4Addr>,
    socket: Option<Socket>,
    next: usize,
    /// Transmit cookie and local send time per request.
    sent: Vec<(Ipv4Addr, NtpTimestamp, u64)>,
}

#[derive(Default)]
pub(crate) struct SntpState {
    generation: u32,
    request: Option<SyncRequest>,
    round: Option<Round>,
}

// ───────────────────────────────────────────────────────────────
// Public API
// ───────────────────────────────────────────────────────────────

/// Start a sync.  `Err(Busy)` while a round is in flight.
pub fn sync(dev: &mut Device, mut req: SyncRequest) -> Result<()> {
    if dev.sntp.round.is_some() {
        return Err(Error::Busy("sntp sync"));
    }
    if req.servers.is_empty() {
        req.servers = dev.cfg.device.sntp_servers.clone();
    }
    dev.sntp.request = Some(req);
    start_round(dev);
    Ok(())
}

pub fn is_syncing(dev: &Device) -> bool {
    dev.sntp.round.is_some()
}

/// Stop future autorepeat rounds.  A round in flight still completes.
pub fn cancel_autorepeat(dev: &mut Device) {
    if let Some(req) = dev.sntp.request.as_mut() {
        req.autorepeat = false;
    }
}

// ───────────────────────────────────────────────────────────────
// Round
// ───────────────────────────────────────────────────────────────

fn current(dev: &Device, generation: u32) -> bool {
    dev.sntp.generation == generation && dev.sntp.round.is_some()
}

fn start_round(dev: &mut Device) {
    let servers = dev.sntp.request.as_ref().map(|r| r.servers.clone()).unwrap_or_default();
    dev.sntp.generation = dev.sntp.generation.wrapping_add(1);
    let generation = dev.sntp.generation;
    dev.sntp.round = Some(Round {
        pending_dns: servers.len(),
        addrs: Vec::new(),
        socket: None,
        next: 0,
        sent: Vec::new(),
    });
    info!("sntp: sync against {} servers", servers.len());

    if servers.is_empty() {
        finish(dev, Err(SntpFailure::DnsLookup));
        return;
    }
    for name in servers {
        dns::lookup(dev, &name, Box::new(move |dev, ip| resolved(dev, generation, ip)));
    }
}

fn resolved(dev: &mut Device, generation: u32, ip: Option<Ipv4Addr>) {
    if !current(dev, generation) {
        return;
    }
    let Some(round) = dev.sntp.round.as_mut() else {
        return;
    };
    round.pending_dns -= 1;
    if let Some(ip) = ip {
        if !round.addrs.contains(&ip) {
            round.addrs.push(ip);
        }
    }
    if round.pending_dns > 0 {
        return;
    }
    if round.addrs.is_empty() {
        finish(dev, Err(SntpFailure::DnsLookup));
        return;
    }
    open_socket(dev, generation);
}

fn open_socket(dev: &mut Device, generation: u32) {
    let sock = net::create_udp_socket(dev);
    sock.on(
        dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |dev, _, data, from| {
            on_reply(dev, generation, data, from);
        })),
    );
    sock.on(
        dev,
        SocketEvent::Sent,
        Some(SocketCallback::sent(move |dev, _| send_next(dev, generation))),
    );
    if let Some(round) = dev.sntp.round.as_mut() {
        round.socket = Some(sock);
    }

    let timeout = dev.cfg.timing.sntp_timeout_ms;
    dev.post_ms(
        timeout,
        Task::Call(Box::new(move |dev| {
            if current(dev, generation) {
                finish(dev, Err(SntpFailure::Timeout));
            }
        })),
    );
    send_next(dev, generation);
}

/// Local clock reading used for the exchange: RTC time once set, else the
/// counter since power-on.
fn local_us(dev: &mut Device) -> u64 {
    let counter = dev.clock.now_us();
    dev.rtc.now_us(counter).unwrap_or(counter)
}

/// Send the next request; one per `sent`.
fn send_next(dev: &mut Device, generation: u32) {
    if !current(dev, generation) {
        return;
    }
    let t1 = local_us(dev);
    let Some(round) = dev.sntp.round.as_mut() else {
        return;
    };
    let (Some(sock), Some(&ip)) = (round.socket, round.addrs.get(round.next)) else {
        return;
    };
    round.next += 1;
    let cookie = NtpTimestamp::from_unix_us(t1);
    round.sent.push((ip, cookie, t1));

    let request = NtpPacket::client_request(cookie).encode();
    if !sock.send_to(dev, NTP_PORT, ip, &request) {
        warn!("sntp: send to {ip} failed");
        finish(dev, Err(SntpFailure::UdpSend));
        return;
    }
    debug!("sntp: request to {ip}");
}

fn on_reply(dev: &mut Device, generation: u32, data: &[u8], from: Option<SocketAddrV4>) {
    if !current(dev, generation) {
        return;
    }
    let t4 = local_us(dev);
    let Some(from) = from else {
        return;
    };
    let pkt = match NtpPacket::decode(data) {
        Ok(p) => p,
        Err(e) => {
            debug!("sntp: {e} from {from}");
            return;
        }
    };
    if pkt.mode != MODE_SERVER || pkt.stratum == 0 || pkt.transmit.is_zero() {
        debug!("sntp: unusable reply from {from}");
        return;
    }
    let Some(round) = dev.sntp.round.as_ref() else {
        return;
    };
    let Some(&(_, _, t1)) = round
        .sent
        .iter()
        .find(|(ip, cookie, _)| ip == from.ip() && *cookie == pkt.origin)
    else {
        debug!("sntp: reply from {from} does not match a request");
        return;
    };

    let t2 = i128::from(pkt.receive.to_unix_us());
    let t3 = i128::from(pkt.transmit.to_unix_us());
    let (t1, t4) = (i128::from(t1), i128::from(t4));
    let delay = ((t4 - t1) - (t3 - t2)).max(0);
    let offset = ((t2 - t1) + (t3 - t4)) / 2;
    let target = (t3 + delay / 2).max(0) as u64;

    let report = SyncReport {
        sec: target / 1_000_000,
        usec: (target % 1_000_000) as u32,
        server: *from.ip(),
        offset_us: offset as i64,
        delay_us: delay as u64,
        stratum: pkt.stratum,
    };
    rtctime::set(dev, report.sec, report.usec, None);
    info!(
        "sntp: synced to {} (offset {} us, delay {} us)",
        report.server, report.offset_us, report.delay_us
    );
    finish(dev, Ok(report));
}

/// End the round, report, and schedule the next one if autorepeating.
fn finish(dev: &mut Device, outcome: core::result::Result<SyncReport, SntpFailure>) {
    let generation = dev.sntp.generation;
    if let Some(sock) = dev.sntp.round.take().and_then(|r| r.socket) {
        sock.close(dev);
    }
    let (on_ok, on_err, repeat) = match dev.sntp.request.as_ref() {
        Some(r) => (r.on_ok.clone(), r.on_err.clone(), r.autorepeat),
        None => (None, None, false),
    };

    match outcome {
        Ok(report) => {
            if let Some(cb) = on_ok {
                (&mut *cb.borrow_mut())(dev, &report);
            }
        }
        Err(failure) => {
            warn!("sntp: sync failed: {failure}");
            if let Some(cb) = on_err {
                (&mut *cb.borrow_mut())(dev, failure);
            }
        }
    }

    if repeat && dev.sntp.generation == generation && dev.sntp.round.is_none() {
        dev.post_ms(
            AUTOREPEAT_S * 1000,
            Task::Call(Box::new(move |dev| {
                let wanted = dev.sntp.request.as_ref().is_some_and(|r| r.autorepeat);
                if wanted && dev.sntp.generation == generation && dev.sntp.round.is_none() {
                    start_round(dev);
                }
            })),
        );
    }
}
