//! Filter chain integration tests
//!
//! Stopping in-flight filtering through the service.

mod helpers;

use helpers::{test_service_with_chain, EventLog};
use sayq_d::filters::{
    Conversion, FilterChain, FilterInput, FilterStage, SentenceBoundaryStage, StageCompletion,
    StageOutput, StageSlot,
};
use sayq_d::ServiceConfig;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Async stage that only completes once its run is cancelled
struct Stalls;

impl FilterStage for Stalls {
    fn name(&self) -> &str {
        "stalls"
    }

    fn supports_async(&self) -> bool {
        true
    }

    fn convert(&self, input: &FilterInput) -> Conversion {
        Some(StageOutput::unchanged(input.text.clone()))
    }

    fn start_convert(&self, _input: FilterInput, done: StageCompletion) -> bool {
        thread::spawn(move || {
            while !done.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
        });
        true
    }
}

fn stalling_chain() -> FilterChain {
    FilterChain::new(vec![
        StageSlot {
            enabled: true,
            stage: Arc::new(Stalls),
        },
        StageSlot {
            enabled: true,
            stage: Arc::new(SentenceBoundaryStage::default()),
        },
    ])
}

#[test]
fn test_stop_filtering_when_idle() {
    let (service, _log) =
        test_service_with_chain(ServiceConfig::default(), stalling_chain(), &["en"], None);
    assert!(!service.stop_filtering());
    service.shutdown();
}

#[tokio::test]
async fn test_stop_filtering_releases_concurrent_submissions() {
    let (service, log) =
        test_service_with_chain(ServiceConfig::default(), stalling_chain(), &["en"], None);
    let mut events = EventLog::new(service.subscribe());

    let stopper = async {
        while service.jobs().filter_chain().active_runs() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        service.stop_filtering()
    };
    let submissions = async {
        tokio::join!(
            service.jobs().say_async("First one. First two.", "", "a"),
            service.jobs().say_async("Second one.", "", "b"),
        )
    };
    let result = tokio::time::timeout(TIMEOUT, async { tokio::join!(stopper, submissions) }).await;
    let (stopped, (first, second)) = result.expect("submissions should end after stop");

    assert!(stopped);
    assert!(!service.jobs().filter_chain().is_running());
    assert_eq!(service.jobs().sentence_count(first, ""), 2);
    assert_eq!(service.jobs().sentence_count(second, ""), 1);

    let finished = tokio::task::spawn_blocking(move || {
        events.wait_finished(first, TIMEOUT) && events.wait_finished(second, TIMEOUT)
    })
    .await
    .unwrap();
    assert!(finished);
    let mut spoken = log.texts();
    spoken.sort();
    assert_eq!(spoken, vec!["First one.", "First two.", "Second one."]);
    service.shutdown();
}
