//! Fuzz target: NTP reply handling
//!
//! Decodes arbitrary bytes as an NTP header, and also feeds them to an
//! online device as a server reply.  Neither path may panic, and only a
//! usable server reply may set the clock.
//!
//! cargo fuzz run fuzz_ntp_packet

#![no_main]

use std::net::SocketAddrV4;

use libfuzzer_sys::fuzz_target;
use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;
use nodemcu_sim::net::SocketKind;
use nodemcu_sim::ports::{RemoteService, ServiceContext, ServiceReply};
use nodemcu_sim::rtctime;
use nodemcu_sim::sim;
use nodemcu_sim::sntp::packet::{MODE_SERVER, NTP_PORT, NtpPacket, PACKET_LEN};
use nodemcu_sim::sntp::{self, SyncRequest};
use nodemcu_sim::wifi::sta::{self, StationConfig};

/// Answers every request with the fuzzer's bytes.
struct Replay(Vec<u8>);

impl RemoteService for Replay {
    fn on_data(&mut self, _ctx: &ServiceContext, _peer: SocketAddrV4, _data: &[u8]) -> ServiceReply {
        ServiceReply::frame(self.0.clone())
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(pkt) = NtpPacket::decode(data) {
        assert_eq!(&pkt.encode()[..], &data[..PACKET_LEN]);
        let _ = pkt.transmit.to_unix_us();
    }

    let cfg = SimConfig::default();
    let server = cfg.world.ntp_servers[0].ip;
    let (ssid, pwd) = (cfg.world.access_points[0].ssid.clone(), cfg.world.access_points[0].password.clone());
    let Ok(mut dev) = Device::new(cfg) else {
        return;
    };
    if sta::config(&mut dev, StationConfig::new(&ssid, &pwd)).is_err() {
        return;
    }
    dev.run_ms(2500);
    sim::add_service(&mut dev, SocketKind::Udp, SocketAddrV4::new(server, NTP_PORT), Replay(data.to_vec()));

    let req = SyncRequest::new().servers(&[server.to_string()]);
    if sntp::sync(&mut dev, req).is_err() {
        return;
    }
    dev.run_ms(5000);
    assert!(!sntp::is_syncing(&dev));
    if rtctime::get(&mut dev).sec != 0 {
        let pkt = NtpPacket::decode(data).expect("clock set from an undecodable reply");
        assert_eq!(pkt.mode, MODE_SERVER);
        assert_ne!(pkt.stratum, 0);
        assert!(!pkt.transmit.is_zero());
    }
});
