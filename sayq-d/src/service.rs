//! Service composition
//!
//! Builds the filter chain and backends from [`ServiceConfig`], wires the job
//! store, interruption queues and dispatch loop together, and owns the worker
//! for its lifetime.

use sayq_common::events::{EventBus, SayqEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::backends::{BackendRegistry, CommandBackend, SilentBackend, SpeechBackend, StdoutBackend};
use crate::config::{BackendConfig, FilterConfig, FilterKind, ServiceConfig};
use crate::dispatch::{Activity, DispatchLoop, Dispatcher};
use crate::error::{Error, Result};
use crate::filters::{
    FilterChain, FilterStage, ReplaceRule, SentenceBoundaryStage, StageSlot, StringReplacerStage,
    TalkerChooserStage,
};
use crate::interrupts::InterruptQueues;
use crate::jobs::JobStore;
use crate::splitter::SentenceSplitter;

/// Build the configured filter stages, in order.
///
/// Fails if no enabled stage performs sentence boundary detection.
pub fn build_filter_chain(filters: &[FilterConfig]) -> Result<FilterChain> {
    let mut slots = Vec::with_capacity(filters.len());
    for filter in filters {
        let stage: Arc<dyn FilterStage> = match &filter.kind {
            FilterKind::Sbd { delimiter } => {
                let splitter = match delimiter {
                    Some(pattern) => SentenceSplitter::new(pattern)?,
                    None => SentenceSplitter::default(),
                };
                Arc::new(SentenceBoundaryStage::new(&filter.name, splitter))
            }
            FilterKind::StringReplacer { rules, owners } => {
                let rules = rules
                    .iter()
                    .map(|rule| ReplaceRule::new(&rule.pattern, rule.replacement.clone()))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(StringReplacerStage::new(&filter.name, rules, owners.clone()))
            }
            FilterKind::TalkerChooser {
                pattern,
                owners,
                talker,
            } => {
                let pattern = pattern.as_deref().map(regex::Regex::new).transpose()?;
                Arc::new(TalkerChooserStage::new(
                    &filter.name,
                    pattern,
                    owners.clone(),
                    talker.clone(),
                ))
            }
        };
        slots.push(StageSlot {
            enabled: filter.enabled,
            stage,
        });
    }

    let chain = FilterChain::new(slots);
    if !chain.has_boundary_detector() {
        return Err(Error::NoBoundaryDetector);
    }
    info!(stages = ?chain.stage_names(), "Filter chain configured");
    Ok(chain)
}

/// Create a backend per configured talker.
///
/// Entries that cannot be loaded are skipped; fails if none remain.
pub fn build_backends(config: &ServiceConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new(config.default_talker.clone());
    for entry in &config.talkers {
        let name = format!("{}-{}", entry.talker, backend_kind(&entry.backend));
        let backend: Arc<dyn SpeechBackend> = match &entry.backend {
            BackendConfig::Stdout { prefix } => Arc::new(StdoutBackend::new(name, prefix.clone())),
            BackendConfig::Silent => Arc::new(SilentBackend::new(name)),
            BackendConfig::Command { program, args } => {
                if program.trim().is_empty() {
                    warn!(talker = %entry.talker, "Command backend without program, skipping");
                    continue;
                }
                Arc::new(CommandBackend::new(name, program.clone(), args.clone()))
            }
        };
        registry.register(entry.talker.clone(), backend);
    }

    if registry.is_empty() {
        return Err(Error::NoBackends);
    }
    if registry.resolve(&config.default_talker).is_none() {
        warn!(
            talker = %config.default_talker,
            "No backend for the default talker; unmatched talkers will be dropped"
        );
    }
    Ok(registry)
}

fn backend_kind(backend: &BackendConfig) -> &'static str {
    match backend {
        BackendConfig::Stdout { .. } => "stdout",
        BackendConfig::Silent => "silent",
        BackendConfig::Command { .. } => "command",
    }
}

/// The running text-to-speech job service
pub struct SpeechService {
    events: EventBus,
    jobs: Arc<JobStore>,
    interrupts: Arc<InterruptQueues>,
    activity: Arc<Activity>,
    dispatch: Option<DispatchLoop>,
}

impl SpeechService {
    /// Build every component from configuration and start the dispatcher
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let chain = build_filter_chain(&config.filters)?;
        let backends = build_backends(config)?;
        Self::with_components(config, chain, backends)
    }

    /// Start the service over an explicit chain and backend registry
    pub fn with_components(
        config: &ServiceConfig,
        chain: FilterChain,
        backends: BackendRegistry,
    ) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::NoBackends);
        }

        let events = EventBus::new(config.event_capacity);
        let activity = Arc::new(Activity::new());
        let jobs = Arc::new(JobStore::new(
            chain,
            events.clone(),
            config.default_talker.clone(),
            Arc::clone(&activity),
        )?);
        let interrupts = Arc::new(InterruptQueues::new(Arc::clone(&activity)));

        let dispatch = DispatchLoop::spawn(Dispatcher {
            jobs: Arc::clone(&jobs),
            interrupts: Arc::clone(&interrupts),
            backends: Arc::new(backends),
            events: events.clone(),
            announcements: config.announcements.to_announcements(),
            activity: Arc::clone(&activity),
        })?;

        info!(default_talker = %config.default_talker, "Speech service ready");
        Ok(Self {
            events,
            jobs,
            interrupts,
            activity,
            dispatch: Some(dispatch),
        })
    }

    /// The job queue API
    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn interrupts(&self) -> &InterruptQueues {
        &self.interrupts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SayqEvent> {
        self.events.subscribe()
    }

    /// Speak `text` ahead of everything else
    pub fn enqueue_warning(&self, text: &str, talker: &str, owner_id: &str) {
        self.interrupts.enqueue_warning(text, talker, owner_id);
    }

    /// Speak `text` at the next paragraph boundary
    pub fn enqueue_message(&self, text: &str, talker: &str, owner_id: &str) {
        self.interrupts.enqueue_message(text, talker, owner_id);
    }

    /// Stop every submission currently in the filter chain.
    ///
    /// Stopped submissions still become jobs, split without filtering.
    /// Returns false if nothing was being filtered.
    pub fn stop_filtering(&self) -> bool {
        let stopped = self.jobs.filter_chain().stop();
        if stopped {
            info!("Filtering stopped on request");
        }
        stopped
    }

    /// True when nothing is queued to speak and the dispatcher is waiting
    pub fn is_idle(&self) -> bool {
        self.activity.is_idle()
            && !self.jobs.is_speaking()
            && !self.interrupts.has_warnings()
            && !self.interrupts.has_messages()
    }

    /// Stop the dispatcher and wait for it to exit
    pub fn shutdown(mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.shutdown();
        }
        info!("Speech service shut down");
    }
}

impl Drop for SpeechService {
    fn drop(&mut self) {
        if let Some(dispatch) = self.dispatch.take() {
            dispatch.shutdown();
        }
    }
}
