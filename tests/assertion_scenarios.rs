//! End-to-end assertion behaviour against the mock IOC.

mod common;

use std::time::{Duration, Instant};

use common::{assert_poll_duration, mock_channel_access, pv, POLL_INTERVAL};
use ioc_assert::mock::ramp;
use ioc_assert::{AlarmSeverity, AssertError, AssertOptions, PvValue, SetpointOptions};

#[test]
fn test_value_arriving_after_unreachable_period_passes() {
    let (server, ca) = mock_channel_access();
    server.insert_unreachable_for(&pv("LEVEL"), 123, Duration::from_millis(100));

    ca.assert_equals("LEVEL", 123, Duration::from_millis(500))
        .expect("PV should connect and match before the timeout");
}

#[test]
fn test_pv_unreachable_for_whole_timeout_is_reported_distinctly() {
    let (server, ca) = mock_channel_access();
    server.insert_unreachable_for(&pv("LEVEL"), 123, Duration::from_secs(60));

    let err = ca
        .assert_equals("LEVEL", 123, Duration::from_millis(100))
        .unwrap_err();
    match &err {
        AssertError::NeverReachable { pv: name, timeout, .. } => {
            assert_eq!(name, "TE:NDW:LEVEL");
            assert_eq!(*timeout, Duration::from_millis(100));
        }
        other => panic!("expected NeverReachable, got {other:?}"),
    }
    assert!(!err.is_assertion_failure());
}

#[test]
fn test_setpoint_not_followed_reports_last_readback() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("TEMP"), 0.0);
    server.insert(&pv("TEMP:SP"), 0.0);

    let err = ca
        .assert_setpoint_sets_readback(
            5,
            "TEMP",
            SetpointOptions::default().timeout(Duration::from_millis(100)),
        )
        .unwrap_err();

    assert!(err.is_assertion_failure());
    let message = err.to_string();
    assert!(message.contains("to have value 5."), "{message}");
    assert!(message.ends_with("Final PV value was 0.0"), "{message}");
    assert_eq!(
        server.writes(),
        vec![("TE:NDW:TEMP:SP".to_string(), PvValue::Int(5))]
    );
}

#[test]
fn test_setpoint_followed_by_readback_passes() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("TEMP"), 0.0);
    server.insert(&pv("TEMP:SP"), 0.0);
    server.link(&pv("TEMP:SP"), &pv("TEMP"));

    ca.assert_setpoint_sets_readback(5.5, "TEMP", SetpointOptions::default())
        .unwrap();
}

#[test]
fn test_setpoint_with_custom_pv_and_alarm() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("CURR"), 0.0);
    server.insert(&pv("CURR:SET"), 0.0);
    server.link(&pv("CURR:SET"), &pv("CURR"));
    server.set_alarm(&pv("CURR"), AlarmSeverity::Major, "HIHI");

    let err = ca
        .assert_setpoint_sets_readback(
            9.0,
            "CURR",
            SetpointOptions::default()
                .setpoint("CURR:SET")
                .timeout(Duration::from_millis(60)),
        )
        .unwrap_err();
    assert!(err.to_string().contains("'TE:NDW:CURR.SEVR'"));

    ca.assert_setpoint_sets_readback(
        9.0,
        "CURR",
        SetpointOptions::default()
            .setpoint("CURR:SET")
            .alarm(Some(AlarmSeverity::Major)),
    )
    .unwrap();
}

#[test]
fn test_unchanged_value_is_not_increasing() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("SPEED"), 3.0);

    let err = ca
        .assert_value_is_increasing("SPEED", Duration::from_millis(30))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("comparator 'gt'"), "{message}");
    assert!(message.contains("Initial value was 3.0"), "{message}");

    ca.assert_value_is_unchanged("SPEED", Duration::from_millis(30))
        .unwrap();
}

#[test]
fn test_ramping_value_is_increasing() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("POSITION"), 0.0);
    server.spawn_stream(&pv("POSITION"), Duration::from_millis(5), ramp(0.0, 1.0));

    ca.assert_value_is_increasing("POSITION", Duration::from_millis(60))
        .unwrap();
    assert!(ca
        .assert_value_is_decreasing("POSITION", Duration::from_millis(60))
        .is_err());
}

#[test]
fn test_failing_poll_respects_timeout() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("MODE"), "LOCAL");
    let timeout = Duration::from_millis(200);

    let start = Instant::now();
    let result = ca.assert_equals("MODE", "REMOTE", timeout);
    let elapsed = start.elapsed();

    assert!(result.is_err());
    assert_poll_duration(elapsed, timeout, POLL_INTERVAL, "failing assert_equals");
}

#[test]
fn test_immediate_success_returns_quickly() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("MODE"), "REMOTE");

    let start = Instant::now();
    ca.assert_equals("MODE", "REMOTE", Duration::from_secs(10))
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_int_and_float_compare_numerically() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("COUNT"), 5.0);

    ca.assert_equals("COUNT", 5, AssertOptions::default()).unwrap();
    ca.assert_integer_in_range("COUNT", 0, 10, AssertOptions::default())
        .unwrap();
}

#[test]
fn test_text_value_outside_integer_range() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("COUNT"), "4.5");

    let err = ca
        .assert_integer_in_range("COUNT", 0, 10, Duration::from_millis(40))
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Expected PV 'TE:NDW:COUNT' value to be an integer between 0 and 10"));
}

#[test]
fn test_absent_pv_does_not_exist() {
    let (server, ca) = mock_channel_access();
    server.insert(&pv("DISABLE"), 0);

    ca.assert_does_not_exist("OLD_PV", None).unwrap();
    assert!(matches!(
        ca.assert_does_not_exist("DISABLE", None),
        Err(AssertError::Present(name)) if name == "TE:NDW:DISABLE"
    ));
}
