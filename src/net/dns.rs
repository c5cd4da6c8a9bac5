//! DNS client.
//!
//! Names resolve against the world host table, but only when the device has
//! an interface address and at least one DNS server (announced by DHCP or
//! set with [`set_dns_server`]).  Dotted quads answer immediately.

use std::net::Ipv4Addr;

use log::debug;

use super::interface_ip;
use crate::device::Device;
use crate::events::Task;

pub(crate) type DnsReply = Box<dyn FnOnce(&mut Device, Option<Ipv4Addr>)>;

/// Number of DNS server slots.
pub const DNS_SLOTS: usize = 2;

/// Resolve `host`; `callback` receives `None` on failure.
pub fn resolve(
    dev: &mut Device,
    host: &str,
    callback: impl FnOnce(&mut Device, Option<Ipv4Addr>) + 'static,
) {
    lookup(dev, host, Box::new(callback));
}

/// Pin DNS server `idx` (0 or 1).  A pinned slot is not overwritten by DHCP.
pub fn set_dns_server(dev: &mut Device, ip: Ipv4Addr, idx: usize) -> bool {
    if idx >= DNS_SLOTS {
        return false;
    }
    dev.net.dns_servers[idx] = Some(ip);
    dev.net.dns_manual[idx] = true;
    true
}

pub fn get_dns_server(dev: &Device, idx: usize) -> Option<Ipv4Addr> {
    dev.net.dns_servers.get(idx).copied().flatten()
}

/// DHCP announced `ip` as primary DNS server.
pub(crate) fn dhcp_offer(dev: &mut Device, ip: Ipv4Addr) {
    if !dev.net.dns_manual[0] {
        dev.net.dns_servers[0] = Some(ip);
    }
}

pub(crate) fn lookup(dev: &mut Device, host: &str, reply: DnsReply) {
    let latency = if host.parse::<Ipv4Addr>().is_ok() { 0 } else { dev.cfg.timing.dns_latency_ms };
    dev.post_ms(latency, Task::DnsAnswer { host: host.to_owned(), reply });
}

pub(crate) fn answer(dev: &mut Device, host: &str, reply: DnsReply) {
    let ip = answer_for(dev, host);
    debug!("dns: {host} -> {ip:?}");
    reply(dev, ip);
}

fn answer_for(dev: &Device, host: &str) -> Option<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    if !is_valid_name(host) {
        return None;
    }
    if interface_ip(dev).is_none() || dev.net.dns_servers.iter().all(Option::is_none) {
        return None;
    }
    dev.config().host(host)
}

fn is_valid_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}
