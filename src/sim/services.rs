//! Stock remote services.

use std::net::SocketAddrV4;

use log::debug;

use crate::ports::{RemoteService, ServiceContext, ServiceReply};
use crate::sntp::packet::{MODE_CLIENT, MODE_SERVER, NtpPacket, NtpTimestamp};

/// Sends every payload straight back.
#[derive(Debug, Default)]
pub struct EchoService;

impl RemoteService for EchoService {
    fn on_data(&mut self, _ctx: &ServiceContext, _peer: SocketAddrV4, data: &[u8]) -> ServiceReply {
        ServiceReply::frame(data)
    }
}

/// Answers the first request on a connection with a fixed 200 response,
/// then closes.
#[derive(Debug, Clone)]
pub struct HttpService {
    body: String,
    /// Requests served so far.
    pub hits: u32,
}

impl HttpService {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into(), hits: 0 }
    }
}

impl RemoteService for HttpService {
    fn on_data(&mut self, _ctx: &ServiceContext, peer: SocketAddrV4, data: &[u8]) -> ServiceReply {
        if !data.windows(4).any(|w| w == b"\r\n\r\n") {
            return ServiceReply::none();
        }
        self.hits += 1;
        debug!("sim: HTTP request from {peer}");
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.body.len(),
            self.body
        );
        ServiceReply::frame(response).and_close()
    }
}

/// NTP server answering from the world's true clock.
#[derive(Debug, Clone)]
pub struct NtpService {
    stratum: u8,
    reachable: bool,
}

impl NtpService {
    pub fn new(stratum: u8, reachable: bool) -> Self {
        Self { stratum, reachable }
    }
}

impl RemoteService for NtpService {
    fn on_data(&mut self, ctx: &ServiceContext, peer: SocketAddrV4, data: &[u8]) -> ServiceReply {
        if !self.reachable {
            return ServiceReply::none();
        }
        let Ok(req) = NtpPacket::decode(data) else {
            return ServiceReply::none();
        };
        if req.mode != MODE_CLIENT {
            debug!("sim: NTP mode {} from {peer} ignored", req.mode);
            return ServiceReply::none();
        }
        let now = NtpTimestamp::from_unix_us(ctx.true_time_us);
        let reply = NtpPacket {
            leap: 0,
            version: req.version,
            mode: MODE_SERVER,
            stratum: self.stratum,
            poll: req.poll,
            precision: -20,
            root_delay: 0x0000_0100,
            root_dispersion: 0x0000_0200,
            reference_id: *b"SIM\0",
            reference: NtpTimestamp::from_unix_us(ctx.true_time_us.saturating_sub(64_000_000)),
            origin: req.transmit,
            receive: now,
            transmit: now,
        };
        ServiceReply::frame(reply.encode().to_vec())
    }
}
