pub mod test_utils;

use std::sync::Arc;
use std::thread;
use tempdir::TempDir;
use trailmap_core::config::CoreConfig;
use trailmap_core::engine::Engine;
use trailmap_core::service::{Request, Response, Service};
use trailmap_core::Error;

fn start(temp_dir: &TempDir) -> Service {
    let _ = env_logger::builder().is_test(true).try_init();
    let dirs = test_utils::dirs(temp_dir);
    let engine = Engine::open(
        dirs.temp,
        dirs.doc,
        dirs.support,
        dirs.cache,
        CoreConfig::default(),
    )
    .unwrap();
    Service::start(Arc::new(engine)).unwrap()
}

#[tokio::test]
async fn requests_are_answered_in_order() {
    let temp_dir = TempDir::new("service-async").unwrap();
    let service = start(&temp_dir);

    assert_eq!(
        service.call(Request::HasOngoingJourney).await.unwrap(),
        Response::Bool(false)
    );
    let track = test_utils::shanghai_walk(10, 1_000_000);
    assert_eq!(
        service
            .call(Request::OnLocationUpdates(track))
            .await
            .unwrap(),
        Response::CoverageChanged(true)
    );

    // submitted back to back, handled one after the other
    let finalize = service.submit(Request::FinalizeOngoingJourney);
    let list = service.submit(Request::ListAllJourneys);
    let id = match finalize.await.unwrap().unwrap() {
        Response::JourneyId(Some(id)) => id,
        other => panic!("unexpected response: {other:?}"),
    };
    match list.await.unwrap().unwrap() {
        Response::Journeys(journeys) => {
            assert_eq!(journeys.len(), 1);
            assert_eq!(journeys[0].id, id);
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let journey_area = service
        .call(Request::GetJourneyArea(id.clone()))
        .await
        .unwrap();
    assert!(matches!(journey_area, Response::Area(Some(area)) if area > 0));
    assert_eq!(
        service.call(Request::GetCoverageArea).await.unwrap(),
        journey_area
    );

    match service
        .call(Request::RenderMapOverlay {
            zoom: 14.0,
            left: 121.47,
            top: 31.235,
            right: 121.48,
            bottom: 31.228,
        })
        .await
        .unwrap()
    {
        Response::Rendered(render_result) => assert!(!render_result.is_empty()),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn errors_are_replied() {
    let temp_dir = TempDir::new("service-errors").unwrap();
    let service = start(&temp_dir);

    let result = service
        .call(Request::OnLocationUpdate(test_utils::sample(
            100.0, 0.0, 1000,
        )))
        .await;
    assert!(matches!(result, Err(Error::InvalidCoordinate(_))));
    // the worker keeps going
    assert_eq!(
        service.call(Request::Flush).await.unwrap(),
        Response::Done
    );
}

#[test]
fn blocking_callers() {
    let temp_dir = TempDir::new("service-blocking").unwrap();
    let service = Arc::new(start(&temp_dir));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            thread::spawn(move || {
                let track = test_utils::shanghai_walk(5, 1_000_000 + i * 100_000);
                service
                    .call_blocking(Request::OnLocationUpdates(track))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(
        service.call_blocking(Request::ToggleRawDataMode(true)).unwrap(),
        Response::Done
    );
    assert_eq!(
        service.call_blocking(Request::GetRawDataMode).unwrap(),
        Response::Bool(true)
    );
    assert_eq!(
        service.call_blocking(Request::HasOngoingJourney).unwrap(),
        Response::Bool(true)
    );
}

#[test]
fn stopped_service() {
    let temp_dir = TempDir::new("service-stopped").unwrap();
    let mut service = start(&temp_dir);
    service
        .call_blocking(Request::OnLocationUpdate(test_utils::sample(
            37.0, -122.0, 1000,
        )))
        .unwrap();
    service.shutdown();
    assert!(matches!(
        service.call_blocking(Request::Flush),
        Err(Error::ServiceStopped)
    ));
    // shutting down twice is fine
    service.shutdown();
}
