//! Scenario-level coverage for the precompute pipeline's surge policy: the
//! radius cap applied when the upstream feed reports an unusually large
//! aircraft count.

use vncrcc_server::pipeline::effective_radius_nm;

#[test]
fn six_hundred_aircraft_caps_radius_at_eighty_nm() {
    let effective = effective_radius_nm(300.0, 600);
    assert_eq!(effective, 80.0);
    assert!(effective < 300.0, "surge_mode should be true whenever the effective radius is capped");
}

#[test]
fn four_hundred_aircraft_caps_radius_at_one_fifty_nm() {
    let effective = effective_radius_nm(300.0, 400);
    assert_eq!(effective, 150.0);
}

#[test]
fn two_hundred_aircraft_leaves_radius_uncapped() {
    let effective = effective_radius_nm(300.0, 200);
    assert_eq!(effective, 300.0);
}
