//! Sentence boundary detection stage
//!
//! Wraps [`SentenceSplitter`] as a filter stage. Output units are returned as a
//! list and also joined with the unit separator. In async mode the split runs
//! on its own thread.

use std::thread;
use tracing::{debug, warn};

use super::{Conversion, FilterInput, FilterStage, StageCompletion, StageOutput};
use crate::splitter::SentenceSplitter;

pub struct SentenceBoundaryStage {
    name: String,
    splitter: SentenceSplitter,
}

impl SentenceBoundaryStage {
    pub fn new(name: impl Into<String>, splitter: SentenceSplitter) -> Self {
        Self {
            name: name.into(),
            splitter,
        }
    }

    fn split(splitter: &SentenceSplitter, input: &FilterInput) -> StageOutput {
        let split = match &input.delimiter {
            Some(delimiter) => splitter.split_with(&input.text, delimiter),
            None => splitter.split(&input.text),
        };
        debug!(
            kind = ?split.kind,
            sentences = split.sentences.len(),
            "Sentence boundaries detected"
        );
        StageOutput {
            text: split.joined(),
            modified: split.modified,
            talker: None,
            sentences: Some(split.sentences),
        }
    }
}

impl Default for SentenceBoundaryStage {
    fn default() -> Self {
        Self::new("sbd", SentenceSplitter::default())
    }
}

impl FilterStage for SentenceBoundaryStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_boundary_detector(&self) -> bool {
        true
    }

    fn supports_async(&self) -> bool {
        true
    }

    fn convert(&self, input: &FilterInput) -> Conversion {
        Some(Self::split(&self.splitter, input))
    }

    fn start_convert(&self, input: FilterInput, done: StageCompletion) -> bool {
        let splitter = self.splitter.clone();
        let spawned = thread::Builder::new()
            .name("sayq-sbd".to_string())
            .spawn(move || {
                let output = Self::split(&splitter, &input);
                if done.is_cancelled() {
                    debug!("Sentence boundary detection stopped, discarding result");
                    return;
                }
                done.complete(Some(output));
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!("Could not start sentence boundary thread: {}", e);
                false
            }
        }
    }

    fn stop(&self) {
        debug!(stage = %self.name, "Stop requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{ChainOutcome, FilterChain};
    use regex::Regex;
    use std::sync::Arc;

    fn input(text: &str) -> FilterInput {
        FilterInput {
            text: text.to_string(),
            talker: "en".to_string(),
            owner_id: "tester".to_string(),
            delimiter: None,
        }
    }

    #[test]
    fn test_sync_split_joins_with_separator() {
        let stage = SentenceBoundaryStage::default();
        let output = stage.convert(&input("One. Two.")).unwrap();
        assert_eq!(output.text, "One.\tTwo.");
        assert!(output.modified);
    }

    #[test]
    fn test_owner_delimiter_used() {
        let stage = SentenceBoundaryStage::default();
        let mut request = input("a| b| c");
        request.delimiter = Some(Regex::new(r"(\|)\s").unwrap());
        assert_eq!(stage.convert(&request).unwrap().text, "a|\tb|\tc");
    }

    #[tokio::test]
    async fn test_async_split_completes() {
        let chain = FilterChain::single(Arc::new(SentenceBoundaryStage::default()));
        match chain.process_async(input("First. Second? Third!")).await {
            ChainOutcome::Finished(result) => {
                assert_eq!(result.text, "First.\tSecond?\tThird!");
                assert!(result.modified);
            }
            ChainOutcome::Stopped => panic!("unexpected stop"),
        }
    }
}
