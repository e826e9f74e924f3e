// tests/scenarios.rs
//
// Integration coverage for spec.md §8 S1-S6, built entirely on the public
// experiment harness rather than hand-wiring a `Network` per test.

use pretty_assertions::assert_eq;

use dhtsim::config::SimConfig;
use dhtsim::experiment::run_scenario;

fn cfg() -> SimConfig {
    SimConfig::default()
}

#[test]
fn s1_ping_alive() {
    let report = run_scenario("ping-alive", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn s2_ping_dead() {
    let report = run_scenario("ping-dead", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn s3_bucket_eviction() {
    let report = run_scenario("bucket-eviction", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn s4_put_get_round_trip() {
    let report = run_scenario("put-get-round-trip", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn s5_churn_recovery() {
    let report = run_scenario("churn-recovery", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn s6_lookup_coalescing() {
    let report = run_scenario("lookup-coalescing", &cfg()).unwrap();
    assert!(report.passed, "{}", report.detail);
}

#[test]
fn unknown_scenario_is_a_config_style_error_not_a_panic() {
    let err = run_scenario("does-not-exist", &cfg()).unwrap_err();
    assert_eq!(err.to_string(), "unknown scenario: does-not-exist");
}

#[test]
fn scenario_names_lists_every_built_in_scenario() {
    let names = dhtsim::experiment::scenario_names();
    for expected in ["ping-alive", "ping-dead", "bucket-eviction", "put-get-round-trip", "churn-recovery", "lookup-coalescing"] {
        assert!(names.contains(&expected), "missing scenario {expected}");
    }
}
