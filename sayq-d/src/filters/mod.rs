//! Filter chain
//!
//! Drives job text through an ordered list of stages. Each stage either
//! converts the text, declines (not applicable), or, for asynchronous stages,
//! starts work and reports back through a [`StageCompletion`]. A boundary
//! detection stage that modifies the text ends the chain: its output is the
//! final sentence sequence.
//!
//! Boundary detectors hand back their units as a list next to the joined
//! text, so a tab inside a code line or markup fragment never splits a unit.
//!
//! Several runs may be in flight on one chain. Each is tracked in the chain's
//! own state, and [`FilterChain::stop`] reaches all of them.

pub mod sbd;
pub mod string_replacer;
pub mod talker_chooser;

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, warn};

pub use sbd::SentenceBoundaryStage;
pub use string_replacer::{ReplaceRule, StringReplacerStage};
pub use talker_chooser::TalkerChooserStage;

/// Text handed to a stage
#[derive(Debug, Clone)]
pub struct FilterInput {
    pub text: String,
    /// Talker requested for the job; stages may override it
    pub talker: String,
    pub owner_id: String,
    /// Per-owner sentence delimiter, if one was registered
    pub delimiter: Option<Regex>,
}

/// Output of a stage that accepted the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub text: String,
    pub modified: bool,
    /// Replacement talker for the job
    pub talker: Option<String>,
    /// Sentence units, set by boundary detectors
    pub sentences: Option<Vec<String>>,
}

impl StageOutput {
    /// Output that leaves the text as it was
    pub fn unchanged(text: String) -> Self {
        Self {
            text,
            modified: false,
            talker: None,
            sentences: None,
        }
    }

    /// Rewritten text
    pub fn rewritten(text: String) -> Self {
        Self {
            text,
            modified: true,
            talker: None,
            sentences: None,
        }
    }
}

/// `None` means the stage does not apply to this input
pub type Conversion = Option<StageOutput>;

/// Completion handle passed to an asynchronous stage
pub struct StageCompletion {
    tx: oneshot::Sender<Conversion>,
    cancelled: Arc<AtomicBool>,
}

impl StageCompletion {
    fn new(cancelled: Arc<AtomicBool>) -> (Self, oneshot::Receiver<Conversion>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx, cancelled }, rx)
    }

    /// Deliver the stage result. Ignored if the chain stopped waiting.
    pub fn complete(self, conversion: Conversion) {
        let _ = self.tx.send(conversion);
    }

    /// True once the chain has asked this run to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// A pluggable transformation stage
pub trait FilterStage: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this stage performs sentence boundary detection
    fn is_boundary_detector(&self) -> bool {
        false
    }

    /// Whether [`FilterStage::start_convert`] runs off the calling task
    fn supports_async(&self) -> bool {
        false
    }

    /// Synchronous conversion
    fn convert(&self, input: &FilterInput) -> Conversion;

    /// Begin asynchronous conversion. Returns false if the stage declines.
    ///
    /// The default runs [`FilterStage::convert`] inline.
    fn start_convert(&self, input: FilterInput, done: StageCompletion) -> bool {
        match self.convert(&input) {
            Some(output) => {
                done.complete(Some(output));
                true
            }
            None => false,
        }
    }

    /// Ask an in-flight asynchronous conversion to stop
    fn stop(&self) {}
}

/// Final text of a chain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainResult {
    pub text: String,
    pub talker: String,
    pub modified: bool,
    /// Units from the last boundary detector, unless a later stage rewrote the text
    pub sentences: Option<Vec<String>>,
}

/// How a chain run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Finished(ChainResult),
    Stopped,
}

/// Notifications published by the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    Finished,
    Stopped,
}

/// Configured stage with its enabled flag
#[derive(Clone)]
pub struct StageSlot {
    pub enabled: bool,
    pub stage: Arc<dyn FilterStage>,
}

type RunId = u64;

/// Progress of one run
#[derive(Default)]
struct ActiveRun {
    stop_requested: bool,
    stage: Option<usize>,
    cancel: Option<Arc<AtomicBool>>,
}

#[derive(Default)]
struct RunState {
    next_run: RunId,
    runs: BTreeMap<RunId, ActiveRun>,
}

/// Ordered filter stages plus the state of the runs in progress
pub struct FilterChain {
    stages: Vec<StageSlot>,
    state: Mutex<RunState>,
    stop_notify: Notify,
    events: broadcast::Sender<ChainEvent>,
}

impl FilterChain {
    pub fn new(stages: Vec<StageSlot>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            stages,
            state: Mutex::new(RunState::default()),
            stop_notify: Notify::new(),
            events,
        }
    }

    /// Chain with a single enabled stage
    pub fn single(stage: Arc<dyn FilterStage>) -> Self {
        Self::new(vec![StageSlot {
            enabled: true,
            stage,
        }])
    }

    /// Whether any enabled stage performs boundary detection
    pub fn has_boundary_detector(&self) -> bool {
        self.stages
            .iter()
            .any(|slot| slot.enabled && slot.stage.is_boundary_detector())
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.stage.name().to_string()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.lock_state().runs.is_empty()
    }

    /// Number of runs in flight
    pub fn active_runs(&self) -> usize {
        self.lock_state().runs.len()
    }

    /// Index of the stage the oldest active run is in
    pub fn current_stage(&self) -> Option<usize> {
        self.lock_state().runs.values().next().and_then(|run| run.stage)
    }

    /// Run all enabled stages synchronously, blocking the caller
    pub fn process(&self, input: FilterInput) -> ChainOutcome {
        let run_id = self.begin();
        self.run_sync(run_id, input)
    }

    /// Run all enabled stages, awaiting asynchronous stages on their
    /// completion notification.
    pub async fn process_async(&self, input: FilterInput) -> ChainOutcome {
        let run_id = self.begin();
        self.run_async(run_id, input).await
    }

    /// Request every run in flight to stop.
    ///
    /// Returns false (and does nothing) if the chain is idle.
    pub fn stop(&self) -> bool {
        let (stages, cancels) = {
            let mut state = self.lock_state();
            if state.runs.is_empty() {
                return false;
            }
            let mut stages = BTreeSet::new();
            let mut cancels = Vec::new();
            for run in state.runs.values_mut() {
                run.stop_requested = true;
                stages.extend(run.stage);
                cancels.extend(run.cancel.clone());
            }
            (stages, cancels)
        };

        for cancel in cancels {
            cancel.store(true, Ordering::Relaxed);
        }
        for index in stages {
            debug!(stage = %self.stages[index].stage.name(), "Stopping filter stage");
            self.stages[index].stage.stop();
        }
        self.stop_notify.notify_waiters();
        true
    }

    fn run_sync(&self, run_id: RunId, input: FilterInput) -> ChainOutcome {
        let mut run = Run::new(input);
        for (index, slot) in self.stages.iter().enumerate() {
            if !slot.enabled {
                continue;
            }
            if self.enter_stage(run_id, index, None) {
                return self.finish_stopped(run_id);
            }
            match slot.stage.convert(&run.input) {
                Some(output) => {
                    if run.apply(output, slot.stage.as_ref()) {
                        break;
                    }
                }
                None => debug!(stage = %slot.stage.name(), "Filter not applicable"),
            }
        }
        self.finish(run_id, run)
    }

    async fn run_async(&self, run_id: RunId, input: FilterInput) -> ChainOutcome {
        let mut run = Run::new(input);
        for (index, slot) in self.stages.iter().enumerate() {
            if !slot.enabled {
                continue;
            }

            let conversion = if slot.stage.supports_async() {
                let cancel = Arc::new(AtomicBool::new(false));
                if self.enter_stage(run_id, index, Some(Arc::clone(&cancel))) {
                    return self.finish_stopped(run_id);
                }

                let stopped = self.stop_notify.notified();
                tokio::pin!(stopped);
                stopped.as_mut().enable();

                let (done, rx) = StageCompletion::new(cancel);
                if !slot.stage.start_convert(run.input.clone(), done) {
                    debug!(stage = %slot.stage.name(), "Filter declined async conversion");
                    continue;
                }
                if self.stop_requested(run_id) {
                    return self.finish_stopped(run_id);
                }

                let result = tokio::select! {
                    result = rx => result,
                    _ = &mut stopped => return self.finish_stopped(run_id),
                };
                if self.stop_requested(run_id) {
                    return self.finish_stopped(run_id);
                }
                match result {
                    Ok(conversion) => conversion,
                    Err(_) => {
                        warn!(stage = %slot.stage.name(), "Filter dropped its completion");
                        None
                    }
                }
            } else {
                if self.enter_stage(run_id, index, None) {
                    return self.finish_stopped(run_id);
                }
                slot.stage.convert(&run.input)
            };

            match conversion {
                Some(output) => {
                    if run.apply(output, slot.stage.as_ref()) {
                        break;
                    }
                }
                None => debug!(stage = %slot.stage.name(), "Filter not applicable"),
            }
        }
        self.finish(run_id, run)
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new run
    fn begin(&self) -> RunId {
        let mut state = self.lock_state();
        let run_id = state.next_run;
        state.next_run += 1;
        state.runs.insert(run_id, ActiveRun::default());
        run_id
    }

    /// Record the stage about to run; returns true if a stop was requested
    fn enter_stage(&self, run_id: RunId, index: usize, cancel: Option<Arc<AtomicBool>>) -> bool {
        let mut state = self.lock_state();
        match state.runs.get_mut(&run_id) {
            Some(run) => {
                run.stage = Some(index);
                run.cancel = cancel;
                run.stop_requested
            }
            None => true,
        }
    }

    fn stop_requested(&self, run_id: RunId) -> bool {
        self.lock_state()
            .runs
            .get(&run_id)
            .map_or(true, |run| run.stop_requested)
    }

    fn end_run(&self, run_id: RunId) {
        self.lock_state().runs.remove(&run_id);
    }

    fn finish(&self, run_id: RunId, run: Run) -> ChainOutcome {
        self.end_run(run_id);
        let _ = self.events.send(ChainEvent::Finished);
        ChainOutcome::Finished(ChainResult {
            text: run.input.text,
            talker: run.input.talker,
            modified: run.modified,
            sentences: run.sentences,
        })
    }

    fn finish_stopped(&self, run_id: RunId) -> ChainOutcome {
        self.end_run(run_id);
        debug!(run = run_id, "Filter chain run stopped");
        let _ = self.events.send(ChainEvent::Stopped);
        ChainOutcome::Stopped
    }
}

/// Text threaded through the stages of one run
struct Run {
    input: FilterInput,
    modified: bool,
    sentences: Option<Vec<String>>,
}

impl Run {
    fn new(input: FilterInput) -> Self {
        Self {
            input,
            modified: false,
            sentences: None,
        }
    }

    /// Take a stage's output. Returns true if the chain must end here.
    fn apply(&mut self, output: StageOutput, stage: &dyn FilterStage) -> bool {
        if output.sentences.is_some() {
            self.sentences = output.sentences;
        } else if output.modified {
            self.sentences = None;
        }
        self.input.text = output.text;
        if let Some(talker) = output.talker {
            self.input.talker = talker;
        }
        self.modified |= output.modified;
        output.modified && stage.is_boundary_detector()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Appends a suffix; counts calls
    struct Suffix {
        suffix: &'static str,
        boundary: bool,
        calls: AtomicUsize,
    }

    impl Suffix {
        fn new(suffix: &'static str, boundary: bool) -> Arc<Self> {
            Arc::new(Self {
                suffix,
                boundary,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl FilterStage for Suffix {
        fn name(&self) -> &str {
            self.suffix
        }

        fn is_boundary_detector(&self) -> bool {
            self.boundary
        }

        fn convert(&self, input: &FilterInput) -> Conversion {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(StageOutput::rewritten(format!("{}{}", input.text, self.suffix)))
        }
    }

    struct Declines;

    impl FilterStage for Declines {
        fn name(&self) -> &str {
            "declines"
        }

        fn supports_async(&self) -> bool {
            true
        }

        fn convert(&self, _input: &FilterInput) -> Conversion {
            None
        }

        fn start_convert(&self, _input: FilterInput, _done: StageCompletion) -> bool {
            false
        }
    }

    /// Async stage that never completes until stopped
    struct Hangs {
        stopped: AtomicBool,
    }

    impl FilterStage for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        fn supports_async(&self) -> bool {
            true
        }

        fn convert(&self, input: &FilterInput) -> Conversion {
            Some(StageOutput::unchanged(input.text.clone()))
        }

        fn start_convert(&self, _input: FilterInput, done: StageCompletion) -> bool {
            std::thread::spawn(move || {
                while !done.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
            });
            true
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    /// Boundary detector that finds a single unit and leaves the text alone
    struct WholeUnit;

    impl FilterStage for WholeUnit {
        fn name(&self) -> &str {
            "whole"
        }

        fn is_boundary_detector(&self) -> bool {
            true
        }

        fn convert(&self, input: &FilterInput) -> Conversion {
            Some(StageOutput {
                sentences: Some(vec![input.text.clone()]),
                ..StageOutput::unchanged(input.text.clone())
            })
        }
    }

    fn slot(stage: Arc<dyn FilterStage>) -> StageSlot {
        StageSlot {
            enabled: true,
            stage,
        }
    }

    fn input(text: &str) -> FilterInput {
        FilterInput {
            text: text.to_string(),
            talker: "en".to_string(),
            owner_id: String::new(),
            delimiter: None,
        }
    }

    fn finished(outcome: ChainOutcome) -> ChainResult {
        match outcome {
            ChainOutcome::Finished(result) => result,
            ChainOutcome::Stopped => panic!("chain stopped unexpectedly"),
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let chain = FilterChain::new(vec![
            slot(Suffix::new("-a", false)),
            slot(Suffix::new("-b", false)),
        ]);
        let result = finished(chain.process(input("x")));
        assert_eq!(result.text, "x-a-b");
        assert!(result.modified);
        assert!(!chain.is_running());
    }

    #[test]
    fn test_disabled_stage_skipped() {
        let skipped = Suffix::new("-b", false);
        let chain = FilterChain::new(vec![
            slot(Suffix::new("-a", false)),
            StageSlot {
                enabled: false,
                stage: skipped.clone(),
            },
        ]);
        assert_eq!(finished(chain.process(input("x"))).text, "x-a");
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_boundary_detector_ends_chain() {
        let later = Suffix::new("-late", false);
        let chain = FilterChain::new(vec![slot(Suffix::new("-sbd", true)), slot(later.clone())]);
        assert_eq!(finished(chain.process(input("x"))).text, "x-sbd");
        assert_eq!(later.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_not_applicable_stage_passes_through() {
        let chain = FilterChain::new(vec![slot(Arc::new(Declines)), slot(Suffix::new("-a", false))]);
        let result = finished(chain.process(input("x")));
        assert_eq!(result.text, "x-a");
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let chain = FilterChain::single(Suffix::new("-a", false));
        assert!(!chain.stop());
        assert_eq!(finished(chain.process(input("x"))).text, "x-a");
    }

    #[tokio::test]
    async fn test_async_declined_start_falls_through() {
        let chain = FilterChain::new(vec![slot(Arc::new(Declines)), slot(Suffix::new("-a", false))]);
        let mut events = chain.subscribe();
        let result = finished(chain.process_async(input("x")).await);
        assert_eq!(result.text, "x-a");
        assert_eq!(events.recv().await.unwrap(), ChainEvent::Finished);
    }

    #[tokio::test]
    async fn test_async_stop_mid_stage() {
        let hangs = Arc::new(Hangs {
            stopped: AtomicBool::new(false),
        });
        let chain = Arc::new(FilterChain::single(hangs.clone()));
        let mut events = chain.subscribe();

        let runner = {
            let chain = Arc::clone(&chain);
            tokio::spawn(async move { chain.process_async(input("x")).await })
        };

        while chain.current_stage().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(chain.stop());

        let outcome = runner.await.unwrap();
        assert_eq!(outcome, ChainOutcome::Stopped);
        assert!(hangs.stopped.load(Ordering::SeqCst));
        assert!(!chain.is_running());
        assert_eq!(events.recv().await.unwrap(), ChainEvent::Stopped);
    }

    #[test]
    fn test_units_carried_past_unmodifying_stages() {
        let chain = FilterChain::new(vec![slot(Arc::new(WholeUnit)), slot(Arc::new(Declines))]);
        let result = finished(chain.process(input("if (x)\tgo();")));
        assert_eq!(result.sentences, Some(vec!["if (x)\tgo();".to_string()]));
    }

    #[test]
    fn test_rewrite_after_boundary_detector_drops_units() {
        let chain = FilterChain::new(vec![slot(Arc::new(WholeUnit)), slot(Suffix::new("-a", false))]);
        let result = finished(chain.process(input("x")));
        assert_eq!(result.text, "x-a");
        assert_eq!(result.sentences, None);
    }

    #[tokio::test]
    async fn test_stop_reaches_concurrent_runs() {
        let hangs = Arc::new(Hangs {
            stopped: AtomicBool::new(false),
        });
        let chain = Arc::new(FilterChain::single(hangs.clone()));
        let mut events = chain.subscribe();

        let runners: Vec<_> = (0..2)
            .map(|_| {
                let chain = Arc::clone(&chain);
                tokio::spawn(async move { chain.process_async(input("x")).await })
            })
            .collect();

        while chain.active_runs() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(chain.stop());

        for runner in runners {
            let outcome = tokio::time::timeout(Duration::from_secs(1), runner)
                .await
                .expect("run should end after stop")
                .unwrap();
            assert_eq!(outcome, ChainOutcome::Stopped);
        }
        assert!(!chain.is_running());
        assert_eq!(events.recv().await.unwrap(), ChainEvent::Stopped);
        assert_eq!(events.recv().await.unwrap(), ChainEvent::Stopped);
    }
}
