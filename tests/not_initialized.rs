use trailmap_core::api::api;
use trailmap_core::Error;

#[test]
fn calls_before_init_fail() {
    assert!(matches!(
        api::on_location_update(37.0, -122.0, 1000, 5.0, None, None),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        api::has_ongoing_journey(),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(
        api::render_map_overlay(10.0, -122.01, 37.01, -121.99, 36.99),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(api::get_raw_data_mode(), Err(Error::NotInitialized)));
    assert!(matches!(api::get_coverage_area(), Err(Error::NotInitialized)));
    assert!(matches!(api::engine(), Err(Error::NotInitialized)));
}
