//! Station, soft-AP, event monitor and modem suspend.

use std::cell::RefCell;
use std::rc::Rc;

use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;
use nodemcu_sim::error::{Error, WifiError};
use nodemcu_sim::node;
use nodemcu_sim::sim;
use nodemcu_sim::wifi::ap::{self, ApConfig};
use nodemcu_sim::wifi::eventmon::{self, EventDelivery, WifiEvent, WifiEventKind};
use nodemcu_sim::wifi::sta::{self, DisconnectReason, StationConfig, StationStatus};
use nodemcu_sim::wifi::{self, Mode, SuspendRequest, SuspendState};

use crate::mock_world::{PASSWORD, SSID, counter, device, online_device};

fn record_all(dev: &mut Device) -> Rc<RefCell<Vec<WifiEvent>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    for kind in WifiEventKind::ALL {
        let s = seen.clone();
        eventmon::register(dev, kind, move |_, ev| s.borrow_mut().push(ev.clone()));
    }
    seen
}

// ── Station ───────────────────────────────────────────────────

#[test]
fn station_connects_then_gets_ip() {
    let mut dev = device();
    let seen = record_all(&mut dev);
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    assert_eq!(sta::status(&dev), StationStatus::Connecting);

    dev.run_ms(1999);
    assert_eq!(sta::getip(&dev), None);
    dev.run_ms(1);
    assert_eq!(sta::status(&dev), StationStatus::GotIp);

    let kinds: Vec<_> = seen.borrow().iter().map(WifiEvent::kind).collect();
    assert_eq!(kinds, vec![WifiEventKind::StaConnected, WifiEventKind::StaGotIp]);
    let ip = sta::getip(&dev).unwrap();
    assert_eq!(
        seen.borrow()[1],
        WifiEvent::StaGotIp { ip: ip.ip, netmask: ip.netmask, gateway: ip.gateway }
    );
    assert_eq!(wifi::get_channel(&dev), 6);
    assert_eq!(sta::getrssi(&dev), Some(-58));
}

#[test]
fn wrong_password_reports_auth_failure_and_retries() {
    let mut dev = device();
    let seen = record_all(&mut dev);
    sta::config(&mut dev, StationConfig::new(SSID, "not-the-password")).unwrap();
    dev.run_ms(2000);
    assert_eq!(sta::status(&dev), StationStatus::WrongPassword);
    assert!(matches!(
        seen.borrow().last(),
        Some(WifiEvent::StaDisconnected { reason: DisconnectReason::AuthFail, .. })
    ));

    dev.run_ms(10_000);
    let failures = seen
        .borrow()
        .iter()
        .filter(|e| e.kind() == WifiEventKind::StaDisconnected)
        .count();
    assert!(failures >= 2, "auto-connect keeps retrying, saw {failures}");
}

#[test]
fn refused_association_is_a_connect_failure() {
    let mut dev = device();
    let seen = record_all(&mut dev);
    assert!(sim::ap_refuse_association(&mut dev, SSID, true));
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2000);
    assert_eq!(sta::status(&dev), StationStatus::ConnectFail);
    assert_eq!(sta::getip(&dev), None);
    assert!(matches!(
        seen.borrow().as_slice(),
        [WifiEvent::StaDisconnected { reason: DisconnectReason::AssocFail, .. }]
    ));

    // A slot frees up; the auto-connect retry gets in.
    sim::ap_refuse_association(&mut dev, SSID, false);
    dev.run_ms(8000);
    assert_eq!(sta::status(&dev), StationStatus::GotIp);
    assert!(!sim::ap_refuse_association(&mut dev, "elsewhere", true));
}

#[test]
fn unknown_ssid_is_not_found_and_auto_off_gives_up() {
    let mut dev = device();
    sta::config(&mut dev, StationConfig::new("elsewhere", "").auto(false)).unwrap();
    assert_eq!(sta::status(&dev), StationStatus::Idle);
    sta::connect(&mut dev).unwrap();
    dev.run_ms(2000);
    assert_eq!(sta::status(&dev), StationStatus::NoApFound);
    dev.run_ms(20_000);
    assert_eq!(sta::status(&dev), StationStatus::NoApFound);
}

#[test]
fn credential_validation() {
    let mut dev = device();
    let long = "x".repeat(33);
    assert_eq!(
        sta::config(&mut dev, StationConfig::new(&long, PASSWORD)),
        Err(Error::Wifi(WifiError::InvalidSsid))
    );
    assert!(
        sta::config(&mut dev, StationConfig::new(SSID, "short")).is_ok(),
        "5 characters is a WEP key"
    );
    assert_eq!(
        sta::config(&mut dev, StationConfig::new(SSID, "sixsix")),
        Err(Error::Wifi(WifiError::InvalidPassword))
    );
}

#[test]
fn disconnect_reports_assoc_leave() {
    let mut dev = online_device();
    let seen = record_all(&mut dev);
    sta::disconnect(&mut dev);
    dev.run_ms(1);
    assert_eq!(sta::status(&dev), StationStatus::Idle);
    assert!(matches!(
        seen.borrow().as_slice(),
        [WifiEvent::StaDisconnected { reason: DisconnectReason::AssocLeave, .. }]
    ));
    dev.run_ms(30_000);
    assert_eq!(sta::status(&dev), StationStatus::Idle);
}

#[test]
fn saved_config_survives_restart_unsaved_does_not() {
    let mut dev = device();
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD).save(true)).unwrap();
    dev.run_ms(2500);
    node::restart(&mut dev);
    dev.run_ms(2500);
    assert_eq!(sta::status(&dev), StationStatus::GotIp);

    sta::clearconfig(&mut dev);
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2500);
    node::restart(&mut dev);
    dev.run_ms(2500);
    assert_eq!(sta::getconfig(&dev), None);
    assert_eq!(sta::status(&dev), StationStatus::Idle);
}

#[test]
fn scan_lists_online_access_points() {
    let mut dev = device();
    let found = Rc::new(RefCell::new(None));
    let f = found.clone();
    assert!(sta::scan(&mut dev, move |_, aps| *f.borrow_mut() = Some(aps)));
    dev.run_ms(2000);
    let aps = found.borrow_mut().take().unwrap();
    assert_eq!(aps.len(), 1);
    assert_eq!(aps[0].ssid, SSID);

    sim::ap_power(&mut dev, SSID, false);
    let f = found.clone();
    sta::scan(&mut dev, move |_, aps| *f.borrow_mut() = Some(aps));
    dev.run_ms(2000);
    assert_eq!(found.borrow().as_ref().map(Vec::len), Some(0));
}

// ── Event monitor ─────────────────────────────────────────────

#[test]
fn late_handler_never_sees_past_got_ip() {
    let mut dev = online_device();
    let late = counter();
    let l = late.clone();
    eventmon::register(&mut dev, WifiEventKind::StaGotIp, move |_, _| *l.borrow_mut() += 1);
    dev.run_ms(10_000);
    assert_eq!(*late.borrow(), 0);
    assert!(eventmon::dropped_count(&dev) >= 2);
}

#[test]
fn handler_registered_in_the_same_turn_misses_the_mode_change() {
    let mut dev = device();
    wifi::set_mode(&mut dev, Mode::SoftAp, false);
    let seen = record_all(&mut dev);
    dev.run_ms(1);
    assert!(seen.borrow().is_empty());

    wifi::set_mode(&mut dev, Mode::Null, false);
    dev.run_ms(1);
    assert_eq!(
        *seen.borrow(),
        vec![WifiEvent::WifiModeChanged { old: Mode::SoftAp, new: Mode::Null }]
    );
}

#[test]
fn buffered_delivery_replays_on_registration() {
    let mut cfg = SimConfig::default();
    cfg.device.wifi_event_delivery = EventDelivery::Buffer;
    let mut dev = Device::new(cfg).unwrap();
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2500);

    let got = Rc::new(RefCell::new(Vec::new()));
    let g = got.clone();
    eventmon::register(&mut dev, WifiEventKind::StaGotIp, move |_, ev| g.borrow_mut().push(ev.clone()));
    assert!(got.borrow().is_empty(), "replay goes through the loop");
    dev.run_ms(1);
    assert_eq!(got.borrow().len(), 1);
    assert_eq!(eventmon::dropped_count(&dev), 0);
}

#[test]
fn unregister_silences_a_kind() {
    let mut dev = device();
    let seen = record_all(&mut dev);
    eventmon::unregister(&mut dev, WifiEventKind::StaConnected);
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2500);
    let kinds: Vec<_> = seen.borrow().iter().map(WifiEvent::kind).collect();
    assert_eq!(kinds, vec![WifiEventKind::StaGotIp]);
}

// ── Soft-AP ───────────────────────────────────────────────────

#[test]
fn soft_ap_tracks_clients() {
    let mut dev = device();
    assert_eq!(ap::getip(&dev), None);
    assert_eq!(wifi::set_mode(&mut dev, Mode::StationAp, false), Mode::StationAp);
    ap::config(&mut dev, ApConfig::new("sensor-hub", "hub-password").max_connections(1)).unwrap();
    dev.run_ms(1);
    let seen = record_all(&mut dev);

    let phone = [0x02, 0, 0, 0, 0, 1];
    let laptop = [0x02, 0, 0, 0, 0, 2];
    assert!(sim::station_join(&mut dev, phone));
    assert!(!sim::station_join(&mut dev, laptop), "max_connections reached");
    sim::probe_request(&mut dev, laptop, -70);
    assert!(sim::station_leave(&mut dev, phone));
    dev.run_ms(1);

    let kinds: Vec<_> = seen.borrow().iter().map(WifiEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            WifiEventKind::ApStaConnected,
            WifiEventKind::ApProbeReq,
            WifiEventKind::ApStaDisconnected,
        ]
    );
    assert!(ap::clients(&dev).is_empty());
    assert_eq!(ap::getconfig(&dev).ssid.as_str(), "sensor-hub");
}

#[test]
fn leaving_ap_mode_drops_clients() {
    let mut dev = device();
    wifi::set_mode(&mut dev, Mode::SoftAp, false);
    sim::station_join(&mut dev, [2, 0, 0, 0, 0, 9]);
    assert_eq!(ap::clients(&dev).len(), 1);
    wifi::set_mode(&mut dev, Mode::Station, false);
    assert!(ap::clients(&dev).is_empty());
    assert_eq!(ap::getip(&dev), None);
}

#[test]
fn saved_mode_applies_after_restart() {
    let mut dev = device();
    wifi::set_mode(&mut dev, Mode::SoftAp, true);
    node::restart(&mut dev);
    dev.run_ms(1);
    assert_eq!(wifi::get_mode(&dev), Mode::SoftAp);

    wifi::set_mode(&mut dev, Mode::StationAp, false);
    node::restart(&mut dev);
    dev.run_ms(1);
    assert_eq!(wifi::get_mode(&dev), Mode::SoftAp);
}

// ── Modem suspend ─────────────────────────────────────────────

#[test]
fn timed_suspend_drops_link_and_reconnects() {
    let mut dev = online_device();
    let hooks = Rc::new(RefCell::new(Vec::new()));
    let (a, b) = (hooks.clone(), hooks.clone());
    let req = SuspendRequest::new(1_000_000)
        .on_suspend(move |_| a.borrow_mut().push("suspend"))
        .on_resume(move |_| b.borrow_mut().push("resume"));
    wifi::suspend(&mut dev, req).unwrap();
    assert_eq!(wifi::suspend_state(&dev), SuspendState::Pending);
    assert_eq!(
        wifi::suspend(&mut dev, SuspendRequest::new(0)),
        Err(Error::Busy("wifi suspend"))
    );

    dev.run_ms(1);
    assert_eq!(wifi::suspend_state(&dev), SuspendState::Suspended);
    assert_eq!(sta::getip(&dev), None);

    dev.run_ms(1000);
    assert_eq!(wifi::suspend_state(&dev), SuspendState::Awake);
    assert_eq!(*hooks.borrow(), vec!["suspend", "resume"]);
    dev.run_ms(2500);
    assert_eq!(sta::status(&dev), StationStatus::GotIp);
}

#[test]
fn suspend_rules() {
    let mut dev = device();
    assert_eq!(
        wifi::suspend(&mut dev, SuspendRequest::new(10)),
        Err(Error::Wifi(WifiError::InvalidSuspendDuration(10)))
    );
    assert!(!wifi::resume(&mut dev, None));

    wifi::suspend(&mut dev, SuspendRequest::new(0)).unwrap();
    assert!(wifi::resume(&mut dev, None), "cancels the pending request");
    dev.run_ms(10);
    assert_eq!(wifi::suspend_state(&dev), SuspendState::Awake);

    wifi::set_mode(&mut dev, Mode::SoftAp, false);
    assert_eq!(
        wifi::suspend(&mut dev, SuspendRequest::new(0)),
        Err(Error::Wifi(WifiError::WrongMode))
    );
}

#[test]
fn indefinite_suspend_without_preserve_resumes_in_null_mode() {
    let mut dev = online_device();
    wifi::suspend(&mut dev, SuspendRequest::new(0).preserve_mode(false)).unwrap();
    dev.run_ms(60_000);
    assert_eq!(wifi::suspend_state(&dev), SuspendState::Suspended);
    assert!(wifi::resume(&mut dev, None));
    assert_eq!(wifi::get_mode(&dev), Mode::Null);
    assert_eq!(sta::status(&dev), StationStatus::Idle);
}
