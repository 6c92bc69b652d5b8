//! Test helper modules for sayq-d integration tests
//!
//! Provides reusable test infrastructure components:
//! - RecordingBackend: captures spoken text, optionally blocking on a sentence
//! - EventLog: drains the event bus and waits for specific events
//! - test_service: builds a service over recording backends
//! - test_service_with_chain: the same over a custom filter chain

#![allow(dead_code)]

pub mod event_log;
pub mod recording_backend;

pub use event_log::{wait_until, EventLog};
pub use recording_backend::{Gate, RecordingBackend, Spoken, SpokenLog};

use sayq_d::backends::BackendRegistry;
use sayq_d::filters::{FilterChain, SentenceBoundaryStage};
use sayq_d::{ServiceConfig, SpeechService};
use std::sync::Arc;

/// Service with a recording backend per talker in `talkers`
pub fn test_service(
    config: ServiceConfig,
    talkers: &[&str],
    gate: Option<Arc<Gate>>,
) -> (SpeechService, SpokenLog) {
    let chain = FilterChain::single(Arc::new(SentenceBoundaryStage::default()));
    test_service_with_chain(config, chain, talkers, gate)
}

/// Like [`test_service`], over a caller-built filter chain
pub fn test_service_with_chain(
    config: ServiceConfig,
    chain: FilterChain,
    talkers: &[&str],
    gate: Option<Arc<Gate>>,
) -> (SpeechService, SpokenLog) {
    let log = SpokenLog::default();
    let mut registry = BackendRegistry::new(config.default_talker.clone());
    for talker in talkers {
        let backend = RecordingBackend::new(*talker, log.clone(), gate.clone());
        registry.register(*talker, Arc::new(backend));
    }
    let service = SpeechService::with_components(&config, chain, registry)
        .expect("service should start");
    (service, log)
}
