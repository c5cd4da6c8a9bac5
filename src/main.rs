//! nodemcu-sim: run a scripted NodeMCU session in virtual time.
//!
//! ```text
//!   boot ─▶ station connect ─▶ got ip ─▶ SNTP sync ─▶ HTTP GET
//!                                  └──▶ auto timer: ADC + clock every 10 s
//! ```
//!
//! Usage:
//!   nodemcu-sim --seconds 60 --config world.json
#![deny(unused_must_use)]

use std::fs;
use std::net::SocketAddrV4;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};

use nodemcu_sim::config::SimConfig;
use nodemcu_sim::net::{self, SocketCallback, SocketEvent, SocketKind};
use nodemcu_sim::sim::{self, HttpService};
use nodemcu_sim::sntp::{self, SyncRequest};
use nodemcu_sim::tmr::{self, TimerMode};
use nodemcu_sim::wifi::eventmon::WifiEvent;
use nodemcu_sim::wifi::sta::{self, StationConfig};
use nodemcu_sim::{Device, adc, node, rtctime};

/// Simulate a NodeMCU board joining WiFi, syncing time and fetching a page.
#[derive(Parser)]
#[command(name = "nodemcu-sim", version, about)]
struct Cli {
    /// JSON simulation config; fields left out keep their defaults.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Virtual seconds to run.
    #[arg(long, short, default_value_t = 60)]
    seconds: u64,
}

fn load_config(path: Option<&PathBuf>) -> Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let cfg: SimConfig =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(cfg)
}

fn fetch_page(dev: &mut Device) {
    let conn = net::create_connection(dev);
    conn.on(
        dev,
        SocketEvent::Connection,
        Some(SocketCallback::connection(|dev, s| {
            s.send(dev, b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        })),
    );
    conn.on(
        dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(|_, _, data, _| {
            let text = String::from_utf8_lossy(data);
            info!("demo: HTTP reply: {}", text.lines().next().unwrap_or(""));
        })),
    );
    conn.on(
        dev,
        SocketEvent::Reconnection,
        Some(SocketCallback::reconnection(|_, _, err| warn!("demo: HTTP connect failed: {err}"))),
    );
    conn.connect(dev, 80, "example.com");
}

fn on_got_ip(dev: &mut Device, event: &WifiEvent) {
    if let WifiEvent::StaGotIp { ip, .. } = event {
        info!("demo: got ip {ip}");
    }
    let req = SyncRequest::new()
        .on_success(|dev, report| {
            info!(
                "demo: time {}.{:06} from {} (offset {} us)",
                report.sec, report.usec, report.server, report.offset_us
            );
            if let Some(cal) = rtctime::epoch2cal(report.sec as i64) {
                info!(
                    "demo: UTC {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    cal.year, cal.mon, cal.day, cal.hour, cal.min, cal.sec
                );
            }
            fetch_page(dev);
        })
        .on_error(|_, failure| warn!("demo: SNTP failed: {failure}"));
    if let Err(e) = sntp::sync(dev, req) {
        warn!("demo: {e}");
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.as_ref())?;
    let Some(ap) = cfg.world.access_points.first().cloned() else {
        bail!("config has no access points to join");
    };
    let example = cfg.world.hosts.iter().find(|h| h.name == "example.com").map(|h| h.ip);

    let mut dev = Device::new(cfg).context("invalid simulation config")?;
    info!("nodemcu-sim v{} chip {:06x}", env!("CARGO_PKG_VERSION"), node::chipid(&dev));

    if let Some(ip) = example {
        sim::add_service(&mut dev, SocketKind::Tcp, SocketAddrV4::new(ip, 80), HttpService::new("hello from the sim"));
    }

    let station = StationConfig::new(&ap.ssid, &ap.password).on_got_ip(on_got_ip).on_disconnected(
        |_, event| {
            if let WifiEvent::StaDisconnected { ssid, reason, .. } = event {
                warn!("demo: lost \"{ssid}\" ({reason:?})");
            }
        },
    );
    sta::config(&mut dev, station)?;

    let heartbeat = tmr::create(&mut dev);
    heartbeat.alarm(&mut dev, 10_000, TimerMode::Auto, |dev, _| {
        let tout = adc::read(dev, 0).unwrap_or(adc::INVALID_READING);
        let now = rtctime::get(dev);
        info!(
            "demo: uptime {} s, adc {}, rtc {}.{:06}, queued tasks {}",
            tmr::time(dev),
            tout,
            now.sec,
            now.usec,
            dev.pending_tasks()
        );
    })?;

    let ran = dev.run_ms(cli.seconds.saturating_mul(1000));
    info!(
        "demo: {} tasks in {} virtual seconds, station {:?}",
        ran,
        cli.seconds,
        sta::status(&dev)
    );
    Ok(())
}
