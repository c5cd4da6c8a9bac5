//! Timer scheduling in virtual time.

use std::cell::RefCell;
use std::rc::Rc;

use nodemcu_sim::error::{Error, TimerError};
use nodemcu_sim::node;
use nodemcu_sim::tmr::{self, MAX_INTERVAL_MS, TimerMode};

use crate::mock_world::{counter, device};

// ── Single ────────────────────────────────────────────────────

#[test]
fn single_shot_fires_once_at_deadline_then_unregisters() {
    let mut dev = device();
    let fired = counter();
    let f = fired.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 5000, TimerMode::Single, move |_, _| *f.borrow_mut() += 1)
        .unwrap();

    dev.run_ms(4999);
    assert_eq!(*fired.borrow(), 0);
    assert!(t.state(&dev).unwrap().running);

    dev.run_ms(1);
    assert_eq!(*fired.borrow(), 1);
    assert_eq!(t.state(&dev), None);

    dev.run_ms(20_000);
    assert_eq!(*fired.borrow(), 1);
    assert!(!t.start(&mut dev));
}

#[test]
fn single_shot_may_rearm_itself() {
    let mut dev = device();
    let fired = counter();
    let f = fired.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 100, TimerMode::Single, move |dev, t| {
        *f.borrow_mut() += 1;
        if *f.borrow() < 3 {
            let f = f.clone();
            t.alarm(dev, 100, TimerMode::Single, move |_, _| *f.borrow_mut() += 10)
                .unwrap();
        }
    })
    .unwrap();
    dev.run_ms(1000);
    assert_eq!(*fired.borrow(), 11);
    assert_eq!(t.state(&dev), None);
}

// ── Auto / Semi ───────────────────────────────────────────────

#[test]
fn auto_fires_every_interval_until_stopped() {
    let mut dev = device();
    let stamps = Rc::new(RefCell::new(Vec::new()));
    let s = stamps.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 1000, TimerMode::Auto, move |dev, _| s.borrow_mut().push(dev.now_us()))
        .unwrap();
    dev.run_ms(5500);
    assert_eq!(*stamps.borrow(), vec![1_000_000, 2_000_000, 3_000_000, 4_000_000, 5_000_000]);

    assert!(t.stop(&mut dev));
    dev.run_ms(5000);
    assert_eq!(stamps.borrow().len(), 5);
    assert_eq!(t.state(&dev).map(|s| s.running), Some(false));
}

#[test]
fn semi_stops_but_stays_registered() {
    let mut dev = device();
    let fired = counter();
    let f = fired.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 200, TimerMode::Semi, move |_, _| *f.borrow_mut() += 1)
        .unwrap();
    dev.run_ms(1000);
    assert_eq!(*fired.borrow(), 1);
    let state = t.state(&dev).unwrap();
    assert!(!state.running);
    assert_eq!(state.mode, TimerMode::Semi);

    assert!(t.start(&mut dev));
    dev.run_ms(200);
    assert_eq!(*fired.borrow(), 2);
}

#[test]
fn interval_change_rearms_from_now() {
    let mut dev = device();
    let fired = counter();
    let f = fired.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 1000, TimerMode::Auto, move |_, _| *f.borrow_mut() += 1)
        .unwrap();
    dev.run_ms(900);
    t.interval(&mut dev, 300).unwrap();
    dev.run_ms(299);
    assert_eq!(*fired.borrow(), 0);
    dev.run_ms(1);
    assert_eq!(*fired.borrow(), 1);
}

// ── Registration lifecycle ────────────────────────────────────

#[test]
fn unregister_clears_state() {
    let mut dev = device();
    let t = tmr::create(&mut dev);
    assert_eq!(t.state(&dev), None);
    t.register(&mut dev, 1000, TimerMode::Auto, |_, _| {}).unwrap();
    assert_eq!(t.state(&dev).map(|s| s.running), Some(false));
    assert!(t.start(&mut dev));
    t.unregister(&mut dev);
    assert_eq!(t.state(&dev), None);
    assert!(!t.stop(&mut dev));
}

#[test]
fn interval_bounds_are_enforced() {
    let mut dev = device();
    let t = tmr::create(&mut dev);
    assert_eq!(
        t.register(&mut dev, 0, TimerMode::Single, |_, _| {}),
        Err(Error::Timer(TimerError::IntervalOutOfRange(0)))
    );
    assert!(t.register(&mut dev, MAX_INTERVAL_MS + 1, TimerMode::Single, |_, _| {}).is_err());
    assert!(t.register(&mut dev, MAX_INTERVAL_MS, TimerMode::Single, |_, _| {}).is_ok());
    let fresh = tmr::create(&mut dev);
    assert_eq!(fresh.interval(&mut dev, 10), Err(Error::Timer(TimerError::NotRegistered)));
}

#[test]
fn restart_drops_every_timer() {
    let mut dev = device();
    let fired = counter();
    let f = fired.clone();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 500, TimerMode::Auto, move |_, _| *f.borrow_mut() += 1)
        .unwrap();
    dev.run_ms(600);
    node::restart(&mut dev);
    dev.run_ms(5000);
    assert_eq!(*fired.borrow(), 1);
    assert_eq!(t.state(&dev), None);
}

// ── Busy-waiting and watchdogs ────────────────────────────────

#[test]
fn long_busy_wait_trips_the_watchdog() {
    let mut dev = device();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 10, TimerMode::Single, |dev, _| tmr::delay(dev, 4_000_000))
        .unwrap();
    dev.run_ms(100);
    assert_eq!(node::bootreason(&dev).reason, node::BootReason::SoftwareWatchdog);
}

#[test]
fn fed_busy_wait_survives() {
    let mut dev = device();
    let t = tmr::create(&mut dev);
    t.alarm(&mut dev, 10, TimerMode::Single, |dev, _| {
        for _ in 0..4 {
            tmr::delay(dev, 1_000_000);
            tmr::wdclr(dev);
        }
    })
    .unwrap();
    dev.run_ms(100);
    assert_eq!(node::bootreason(&dev).reason, node::BootReason::PowerOn);
}

#[test]
fn softwd_resets_unless_rearmed() {
    let mut dev = device();
    tmr::softwd(&mut dev, 5);
    dev.run_ms(4000);
    tmr::softwd(&mut dev, 5);
    dev.run_ms(4000);
    assert_eq!(node::bootreason(&dev).reason, node::BootReason::PowerOn);
    dev.run_ms(1000);
    assert_eq!(node::bootreason(&dev).reason, node::BootReason::SoftwareWatchdog);
}

#[test]
fn uptime_counters_follow_virtual_time() {
    let mut dev = device();
    dev.run_ms(2_500);
    assert_eq!(tmr::time(&dev), 2);
    assert_eq!(tmr::now(&dev), 2_500_000);
}
