//! TCP and UDP sockets against remote hosts, loopback and remote peers.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

use nodemcu_sim::net::{
    self, ConnState, LwipError, SocketCallback, SocketEvent, SocketKind, create_server,
};
use nodemcu_sim::sim::{self, EchoService, HttpService};
use nodemcu_sim::wifi::{self, Mode, sta};

use crate::mock_world::{RecordingService, counter, device, online_device};

const EXAMPLE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

fn add_recorder(dev: &mut nodemcu_sim::Device, port: u16, svc: &RecordingService) {
    sim::add_service(dev, SocketKind::Tcp, SocketAddrV4::new(EXAMPLE, port), svc.clone());
}

// ── TCP client ────────────────────────────────────────────────

#[test]
fn connect_by_name_fires_dns_then_connection() {
    let mut dev = online_device();
    let svc = RecordingService::new();
    add_recorder(&mut dev, 8080, &svc);

    let order = Rc::new(RefCell::new(Vec::new()));
    let sock = net::create_connection(&mut dev);
    let o = order.clone();
    sock.on(
        &mut dev,
        SocketEvent::Dns,
        Some(SocketCallback::dns(move |_, _, ip| o.borrow_mut().push(format!("dns {ip:?}")))),
    );
    let o = order.clone();
    sock.on(
        &mut dev,
        SocketEvent::Connection,
        Some(SocketCallback::connection(move |_, _| o.borrow_mut().push("connected".into()))),
    );
    assert!(sock.connect(&mut dev, 8080, "example.com"));
    assert_eq!(sock.state(&dev), Some(ConnState::Connecting));
    dev.run_ms(100);

    assert_eq!(
        *order.borrow(),
        vec![format!("dns {:?}", Some(EXAMPLE)), "connected".to_string()]
    );
    assert_eq!(sock.state(&dev), Some(ConnState::Connected));
    assert_eq!(sock.getpeer(&dev), Some(SocketAddrV4::new(EXAMPLE, 8080)));
    let local = sock.getaddr(&dev).unwrap();
    assert_eq!(Some(*local.ip()), sta::getip(&dev).map(|i| i.ip));
    assert_eq!(*svc.connects.borrow(), vec![local]);
}

#[test]
fn send_on_sent_streams_in_order() {
    let mut dev = online_device();
    let svc = RecordingService::new();
    add_recorder(&mut dev, 9000, &svc);

    let chunks: Vec<Vec<u8>> = (0..5).map(|i| format!("chunk-{i}").into_bytes()).collect();
    let queue = Rc::new(RefCell::new(chunks.clone()));
    let sock = net::create_connection(&mut dev);
    let q = queue.clone();
    sock.on(
        &mut dev,
        SocketEvent::Connection,
        Some(SocketCallback::connection(move |dev, s| {
            let first = q.borrow_mut().remove(0);
            assert!(s.send(dev, &first));
            assert!(!s.send(dev, b"too early"), "second send before sent must be rejected");
        })),
    );
    let q = queue.clone();
    sock.on(
        &mut dev,
        SocketEvent::Sent,
        Some(SocketCallback::sent(move |dev, s| {
            let next = {
                let mut q = q.borrow_mut();
                if q.is_empty() { None } else { Some(q.remove(0)) }
            };
            match next {
                Some(chunk) => {
                    s.send(dev, &chunk);
                }
                None => s.close(dev),
            }
        })),
    );
    sock.connect(&mut dev, 9000, "93.184.216.34");
    dev.run_ms(500);

    assert_eq!(svc.payloads(), chunks);
    assert_eq!(sock.state(&dev), Some(ConnState::Closed));
}

#[test]
fn http_exchange_ends_with_remote_close() {
    let mut dev = online_device();
    sim::add_service(
        &mut dev,
        SocketKind::Tcp,
        SocketAddrV4::new(EXAMPLE, 80),
        HttpService::new("it works"),
    );
    let body = Rc::new(RefCell::new(Vec::new()));
    let closed = counter();

    let sock = net::create_connection(&mut dev);
    sock.on(
        &mut dev,
        SocketEvent::Connection,
        Some(SocketCallback::connection(|dev, s| {
            s.send(dev, b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        })),
    );
    let b = body.clone();
    sock.on(
        &mut dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |_, _, data, _| b.borrow_mut().extend_from_slice(data))),
    );
    let c = closed.clone();
    sock.on(
        &mut dev,
        SocketEvent::Disconnection,
        Some(SocketCallback::disconnection(move |_, _, err| {
            assert_eq!(err, None);
            *c.borrow_mut() += 1;
        })),
    );
    sock.connect(&mut dev, 80, "example.com");
    dev.run_ms(500);

    let text = String::from_utf8(body.borrow().clone()).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.ends_with("it works"));
    assert_eq!(*closed.borrow(), 1);
    assert_eq!(sock.getaddr(&dev), None);
    assert_eq!(sock.getpeer(&dev), None);
}

#[test]
fn refused_and_unroutable_connects_report_reconnection() {
    let mut dev = online_device();
    let errors = Rc::new(RefCell::new(Vec::new()));
    for host in ["93.184.216.34", "nowhere.invalid"] {
        let sock = net::create_connection(&mut dev);
        let e = errors.clone();
        sock.on(
            &mut dev,
            SocketEvent::Reconnection,
            Some(SocketCallback::reconnection(move |_, _, err| e.borrow_mut().push(err))),
        );
        sock.connect(&mut dev, 4444, host);
    }
    dev.run_ms(200);
    assert_eq!(*errors.borrow(), vec![LwipError::Reset, LwipError::Aborted]);

    let mut offline = device();
    let sock = net::create_connection(&mut offline);
    let e = errors.clone();
    sock.on(
        &mut offline,
        SocketEvent::Reconnection,
        Some(SocketCallback::reconnection(move |_, _, err| e.borrow_mut().push(err))),
    );
    assert!(sock.connect(&mut offline, 80, "93.184.216.34"));
    offline.run_ms(10);
    assert_eq!(errors.borrow().last(), Some(&LwipError::Routing));
}

#[test]
fn closed_socket_has_no_addresses_and_ignores_sends() {
    let mut dev = online_device();
    sim::add_service(&mut dev, SocketKind::Tcp, SocketAddrV4::new(EXAMPLE, 7), EchoService);
    let sock = net::create_connection(&mut dev);
    sock.connect(&mut dev, 7, "93.184.216.34");
    dev.run_ms(100);
    assert!(sock.getaddr(&dev).is_some());

    let disconnects = counter();
    let d = disconnects.clone();
    sock.on(
        &mut dev,
        SocketEvent::Disconnection,
        Some(SocketCallback::disconnection(move |_, _, _| *d.borrow_mut() += 1)),
    );
    sock.close(&mut dev);
    dev.run_ms(100);
    assert_eq!(sock.state(&dev), Some(ConnState::Closed));
    assert_eq!(sock.getaddr(&dev), None);
    assert_eq!(sock.getpeer(&dev), None);
    assert!(!sock.send(&mut dev, b"late"));
    assert_eq!(*disconnects.borrow(), 0);
}

// ── Hold / unhold ─────────────────────────────────────────────

#[test]
fn held_socket_queues_until_unhold() {
    let mut dev = online_device();
    sim::add_service(&mut dev, SocketKind::Tcp, SocketAddrV4::new(EXAMPLE, 7), EchoService);
    let got = Rc::new(RefCell::new(Vec::new()));
    let sock = net::create_connection(&mut dev);
    let g = got.clone();
    sock.on(
        &mut dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |_, _, data, _| g.borrow_mut().push(data.to_vec()))),
    );
    sock.on(
        &mut dev,
        SocketEvent::Sent,
        Some(SocketCallback::sent(|dev, s| {
            s.send(dev, b"two");
            s.on(dev, SocketEvent::Sent, None);
        })),
    );
    sock.connect(&mut dev, 7, "93.184.216.34");
    dev.run_ms(50);
    assert!(sock.hold(&mut dev));
    assert!(sock.send(&mut dev, b"one"));
    dev.run_ms(100);
    assert!(got.borrow().is_empty());

    assert!(sock.unhold(&mut dev));
    dev.run_ms(1);
    assert_eq!(*got.borrow(), vec![b"one".to_vec(), b"two".to_vec()]);
}

// ── UDP ───────────────────────────────────────────────────────

#[test]
fn udp_listen_reports_bound_address() {
    let mut dev = online_device();
    let sock = net::create_udp_socket(&mut dev);
    assert_eq!(sock.kind(&dev), Some(SocketKind::Udp));
    assert!(sock.listen(&mut dev, 5000, None));
    let ip = sta::getip(&dev).unwrap().ip;
    assert_eq!(sock.getaddr(&dev), Some(SocketAddrV4::new(ip, 5000)));

    let other = net::create_udp_socket(&mut dev);
    assert!(!other.listen(&mut dev, 5000, None), "port already bound");
    sock.close(&mut dev);
    assert_eq!(sock.getaddr(&dev), None);
    assert!(other.listen(&mut dev, 5000, None));
}

#[test]
fn udp_datagrams_carry_sender_address() {
    let mut dev = online_device();
    let echo = SocketAddrV4::new(EXAMPLE, 7);
    sim::add_service(&mut dev, SocketKind::Udp, echo, EchoService);
    let got = Rc::new(RefCell::new(Vec::new()));
    let sock = net::create_udp_socket(&mut dev);
    let g = got.clone();
    sock.on(
        &mut dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |_, _, data, from| {
            g.borrow_mut().push((data.to_vec(), from));
        })),
    );
    assert!(sock.send_to(&mut dev, 7, EXAMPLE, b"ping"));
    assert!(sock.getaddr(&dev).is_some(), "first send binds an ephemeral port");
    dev.run_ms(100);
    assert_eq!(*got.borrow(), vec![(b"ping".to_vec(), Some(echo))]);
}

#[test]
fn udp_loopback_between_two_sockets() {
    let mut dev = device();
    let got = Rc::new(RefCell::new(Vec::new()));
    let rx = net::create_udp_socket(&mut dev);
    let g = got.clone();
    rx.on(
        &mut dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |_, _, data, _| g.borrow_mut().push(data.to_vec()))),
    );
    assert!(rx.listen(&mut dev, 6000, Some(Ipv4Addr::LOCALHOST)));
    let tx = net::create_udp_socket(&mut dev);
    assert!(tx.send_to(&mut dev, 6000, Ipv4Addr::LOCALHOST, b"hello"));
    dev.run_ms(50);
    assert_eq!(*got.borrow(), vec![b"hello".to_vec()]);
}

// ── Servers ───────────────────────────────────────────────────

#[test]
fn server_accepts_remote_peer_and_loopback_client() {
    let mut dev = device();
    wifi::set_mode(&mut dev, Mode::SoftAp, false);
    let accepted = counter();
    let srv = create_server(&mut dev, 30).unwrap();
    let a = accepted.clone();
    assert!(srv.listen(&mut dev, 80, None, move |dev, s| {
        *a.borrow_mut() += 1;
        s.on(
            dev,
            SocketEvent::Receive,
            Some(SocketCallback::receive(|dev, s, data, _| {
                s.send(dev, &data.to_ascii_uppercase());
            })),
        );
    }));
    assert_eq!(srv.getaddr(&dev), Some(SocketAddrV4::new(Ipv4Addr::new(192, 168, 4, 1), 80)));

    let peer = sim::connect_peer(&mut dev, 80).unwrap();
    dev.run_ms(10);
    peer.send(&mut dev, b"shout");
    dev.run_ms(50);
    assert_eq!(peer.take_received(&mut dev), b"SHOUT");

    let reply = Rc::new(RefCell::new(Vec::new()));
    let client = net::create_connection(&mut dev);
    client.on(
        &mut dev,
        SocketEvent::Connection,
        Some(SocketCallback::connection(|dev, s| {
            s.send(dev, b"local");
        })),
    );
    let r = reply.clone();
    client.on(
        &mut dev,
        SocketEvent::Receive,
        Some(SocketCallback::receive(move |_, _, data, _| r.borrow_mut().extend_from_slice(data))),
    );
    client.connect(&mut dev, 80, "127.0.0.1");
    dev.run_ms(100);
    assert_eq!(*reply.borrow(), b"LOCAL");
    assert_eq!(*accepted.borrow(), 2);
}

#[test]
fn server_port_conflicts_are_rejected() {
    let mut dev = device();
    wifi::set_mode(&mut dev, Mode::SoftAp, false);
    let a = create_server(&mut dev, 10).unwrap();
    let b = create_server(&mut dev, 10).unwrap();
    assert!(a.listen(&mut dev, 8080, None, |_, _| {}));
    assert!(!b.listen(&mut dev, 8080, None, |_, _| {}));
    assert!(!a.listen(&mut dev, 8081, None, |_, _| {}));
    a.close(&mut dev);
    assert_eq!(a.getaddr(&dev), None);
    assert!(b.listen(&mut dev, 8080, None, |_, _| {}));
}
