//! RTC wall clock, RTC user memory and SNTP.

use std::cell::RefCell;
use std::rc::Rc;

use nodemcu_sim::Device;
use nodemcu_sim::config::SimConfig;
use nodemcu_sim::error::{Error, RtcError};
use nodemcu_sim::node::{self, BootReason};
use nodemcu_sim::rtcmem::{self, RTC_MEM_SLOTS};
use nodemcu_sim::rtctime;
use nodemcu_sim::sim;
use nodemcu_sim::sntp::{self, SntpFailure, SyncRequest};
use nodemcu_sim::wifi::sta::{self, StationConfig};

use crate::mock_world::{PASSWORD, SSID, device, online_device};

// ── rtctime ───────────────────────────────────────────────────

#[test]
fn unset_clock_reads_zero() {
    let mut dev = device();
    dev.run_ms(5000);
    let t = rtctime::get(&mut dev);
    assert_eq!((t.sec, t.usec), (0, 0));
}

#[test]
fn clock_runs_from_set_point() {
    let mut dev = device();
    rtctime::set(&mut dev, 1_700_000_000, 250_000, None);
    dev.run_ms(1500);
    let t = rtctime::get(&mut dev);
    assert_eq!((t.sec, t.usec), (1_700_000_001, 750_000));
}

#[test]
fn backward_set_never_makes_time_regress() {
    let mut dev = device();
    rtctime::set(&mut dev, 1000, 0, None);
    dev.run_ms(10);
    let before = rtctime::get(&mut dev).as_micros();

    rtctime::set(&mut dev, 900, 0, None);
    let mut last = before;
    for _ in 0..100 {
        let now = rtctime::get(&mut dev).as_micros();
        assert!(now >= last, "{now} < {last}");
        last = now;
        dev.run_ms(100);
    }
}

#[test]
fn forward_jump_past_threshold_steps() {
    let mut dev = device();
    rtctime::set(&mut dev, 1000, 0, None);
    rtctime::set(&mut dev, 5000, 0, None);
    assert_eq!(rtctime::get(&mut dev).sec, 5000);
}

#[test]
fn wall_time_keeps_running_through_deep_sleep() {
    let mut dev = device();
    rtctime::set(&mut dev, 1_700_000_000, 0, None);
    rtctime::dsleep(&mut dev, 30_000_000);
    dev.run_ms(1);
    assert!(dev.is_asleep());
    dev.run_ms(30_000);
    assert!(!dev.is_asleep());
    assert_eq!(node::bootreason(&dev).reason, BootReason::DeepSleepAwake);
    assert_eq!(rtctime::get(&mut dev).sec, 1_700_000_030);
}

#[test]
fn aligned_sleep_wakes_on_the_boundary() {
    let mut dev = device();
    rtctime::set(&mut dev, 1_700_000_007, 0, None);
    rtctime::dsleep_aligned(&mut dev, 60_000_000, 0).unwrap();
    dev.run_ms(32_999);
    assert!(dev.is_asleep());
    dev.run_ms(1);
    assert!(!dev.is_asleep());
    let t = rtctime::get(&mut dev);
    assert_eq!((t.sec, t.usec), (1_700_000_040, 0));

    let mut fresh = device();
    assert_eq!(
        rtctime::dsleep_aligned(&mut fresh, 60_000_000, 0),
        Err(Error::Rtc(RtcError::TimeNotSet))
    );
    assert_eq!(
        rtctime::dsleep_aligned(&mut dev, 0, 0),
        Err(Error::Rtc(RtcError::ZeroAlignment))
    );
}

#[test]
fn epoch2cal_known_instant() {
    let cal = rtctime::epoch2cal(1_700_000_000).unwrap();
    assert_eq!((cal.year, cal.mon, cal.day), (2023, 11, 14));
    assert_eq!((cal.hour, cal.min, cal.sec), (22, 13, 20));
    assert_eq!(cal.yday, 318);
    assert_eq!(cal.wday, 3);
}

// ── rtcmem ────────────────────────────────────────────────────

#[test]
fn rtcmem_survives_resets_but_not_power_cycles() {
    let mut dev = device();
    rtcmem::write32(&mut dev, 0, &[0xdead_beef, 7]);
    node::restart(&mut dev);
    dev.run_ms(1);
    node::dsleep(&mut dev, 1_000_000);
    dev.run_ms(2000);
    assert_eq!(rtcmem::read32(&dev, 0, 2), vec![0xdead_beef, 7]);

    sim::power_cycle(&mut dev);
    dev.run_ms(1);
    assert_eq!(rtcmem::read32(&dev, 0, 2), vec![0, 0]);
}

#[test]
fn rtcmem_out_of_range_is_a_no_op() {
    let mut dev = device();
    let last = RTC_MEM_SLOTS as i32 - 1;
    rtcmem::write32(&mut dev, -1, &[1, 2]);
    rtcmem::write32(&mut dev, last, &[3, 4, 5]);
    rtcmem::write32(&mut dev, RTC_MEM_SLOTS as i32, &[9]);

    assert_eq!(rtcmem::read32(&dev, 0, 1), vec![2]);
    assert_eq!(rtcmem::read32(&dev, last, 3), vec![3]);
    assert!(rtcmem::read32(&dev, RTC_MEM_SLOTS as i32, 4).is_empty());
    assert!(rtcmem::read32(&dev, -5, 2).is_empty());
}

#[test]
fn rtcmem_huge_count_returns_at_once() {
    let dev = device();
    let started = std::time::Instant::now();
    assert_eq!(rtcmem::read32(&dev, 0, usize::MAX >> 1).len(), RTC_MEM_SLOTS);
    assert_eq!(rtcmem::read32(&dev, -1, 1 << 40).len(), RTC_MEM_SLOTS);
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
}

// ── SNTP ──────────────────────────────────────────────────────

#[test]
fn sntp_corrects_a_drifting_crystal() {
    let mut cfg = SimConfig::default();
    cfg.world.counter_drift_ppm = 200;
    let mut dev = Device::new(cfg).unwrap();
    sta::config(&mut dev, StationConfig::new(SSID, PASSWORD)).unwrap();
    dev.run_ms(2500);

    let synced = Rc::new(RefCell::new(0));
    let s = synced.clone();
    sntp::sync(&mut dev, SyncRequest::new().on_success(move |_, _| *s.borrow_mut() += 1))
        .unwrap();
    dev.run_ms(500);
    assert_eq!(*synced.borrow(), 1);

    let err = |dev: &mut Device| {
        let truth = sim::true_time_us(dev);
        rtctime::get(dev).as_micros().abs_diff(truth)
    };
    assert!(err(&mut dev) < 1_000);
    dev.run_ms(600_000);
    assert!(err(&mut dev) > 50_000, "uncorrected drift accumulates");
}

#[test]
fn sntp_against_explicit_server_list() {
    let mut dev = online_device();
    let servers = Rc::new(RefCell::new(Vec::new()));
    let s = servers.clone();
    let req = SyncRequest::new()
        .servers(&["129.6.15.28", "nowhere.invalid"])
        .on_success(move |_, r| s.borrow_mut().push(r.server));
    sntp::sync(&mut dev, req).unwrap();
    dev.run_ms(500);
    assert_eq!(*servers.borrow(), vec!["129.6.15.28".parse::<std::net::Ipv4Addr>().unwrap()]);
}

#[test]
fn sntp_reset_abandons_the_round() {
    let mut dev = online_device();
    let failures = Rc::new(RefCell::new(Vec::<SntpFailure>::new()));
    let f = failures.clone();
    sntp::sync(&mut dev, SyncRequest::new().on_error(move |_, e| f.borrow_mut().push(e))).unwrap();
    node::restart(&mut dev);
    dev.run_ms(5000);
    assert!(!sntp::is_syncing(&dev));
    assert!(failures.borrow().is_empty());
}
