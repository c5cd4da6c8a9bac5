//! Boot reasons, the lifecycle sink and the ADC.

use nodemcu_sim::adc::{self, AdcMode, INVALID_READING};
use nodemcu_sim::bit;
use nodemcu_sim::node::{self, BootReason, DeviceEvent, ResetInfo};
use nodemcu_sim::sim;

use crate::mock_world::{ScriptedAnalog, device, recorded_device};

#[test]
fn sink_sees_boot_reset_and_sleep() {
    let (mut dev, sink) = recorded_device();
    assert_eq!(sink.boots(), 1);
    node::restart(&mut dev);
    dev.run_ms(1);
    node::dsleep(&mut dev, 2_000_000);
    dev.run_ms(3000);

    assert_eq!(
        *sink.events.borrow(),
        vec![
            DeviceEvent::Booted(ResetInfo::new(BootReason::PowerOn)),
            DeviceEvent::Resetting(BootReason::SoftwareRestart),
            DeviceEvent::Booted(ResetInfo::new(BootReason::SoftwareRestart)),
            DeviceEvent::Sleeping { duration_us: Some(2_000_000) },
            DeviceEvent::Booted(ResetInfo::new(BootReason::DeepSleepAwake)),
        ]
    );
}

#[test]
fn first_reset_request_wins() {
    let (mut dev, sink) = recorded_device();
    sim::raise_exception(&mut dev, 3);
    node::restart(&mut dev);
    dev.run_ms(1);
    assert_eq!(node::bootreason(&dev), ResetInfo::exception(3));
    assert_eq!(sink.last(), Some(DeviceEvent::Booted(ResetInfo::exception(3))));
}

#[test]
fn hardware_watchdog_reason() {
    let mut dev = device();
    sim::hardware_watchdog(&mut dev);
    dev.run_ms(1);
    assert_eq!(node::bootreason(&dev).reason, BootReason::HardwareWatchdog);
    assert_eq!(node::bootreason(&dev).reason as u8, 1);
}

#[test]
fn adc_reads_scripted_tout() {
    let mut dev = device();
    sim::set_analog(&mut dev, Box::new(ScriptedAnalog::new(&[100, 2000, 300])));
    assert_eq!(adc::read(&mut dev, 0), Some(100));
    assert_eq!(adc::read(&mut dev, 0), Some(1023), "clamped to 10 bits");
    assert_eq!(adc::read(&mut dev, 0), Some(300));
    assert_eq!(adc::read(&mut dev, 0), Some(300));
    assert_eq!(adc::read(&mut dev, 1), None);
    assert_eq!(adc::readvdd33(&mut dev), INVALID_READING);
}

#[test]
fn adc_mode_change_needs_restart() {
    let mut dev = device();
    sim::set_analog(&mut dev, Box::new(ScriptedAnalog::new(&[])));
    assert!(adc::force_init_mode(&mut dev, AdcMode::Vdd33));
    assert!(!adc::force_init_mode(&mut dev, AdcMode::Vdd33));
    assert_eq!(adc::readvdd33(&mut dev), INVALID_READING);

    node::restart(&mut dev);
    dev.run_ms(1);
    assert_eq!(adc::readvdd33(&mut dev), 3300);
    assert_eq!(adc::read(&mut dev, 0), Some(INVALID_READING));
}

#[test]
fn bit_helpers_compose() {
    let flags = bit::set(0, &[0, 3, 31]);
    assert!(bit::isset(flags, 31));
    assert!(flags < 0);
    assert_eq!(bit::clear(flags, &[31]), 0b1001);
    assert_eq!(bit::arshift(flags, 28), -8);
    assert_eq!(bit::rshift(flags, 28), 8);
}
