use crate::config;
use crate::error::RunError;
use crate::models::{ApiKey, RunOptions, RunReport, RunState, StyledParagraph};
use crate::services::assembler::{DocumentAssembler, OutputDocument};
use crate::services::chunker::chunk_paragraphs;
use crate::services::llm::{ChunkOutcome, CorrectionService};
use crate::services::prompt::build_instructions;
use crate::services::source::SourceDocument;
use crate::services::tokens::TokenCount;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Receives every state change of a run.
pub trait ProgressSink: Send + Sync {
    fn update(&self, state: RunState);
}

impl ProgressSink for () {
    fn update(&self, _state: RunState) {}
}

/// Cooperative cancellation, honoured between chunks only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        document: OutputDocument,
        report: RunReport,
    },
    /// Every chunk failed; there is nothing to assemble.
    NothingToWrite { report: RunReport },
    Cancelled { report: RunReport },
}

impl RunOutcome {
    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed { report, .. }
            | RunOutcome::NothingToWrite { report }
            | RunOutcome::Cancelled { report } => report,
        }
    }
}

pub struct Pipeline {
    corrector: Arc<dyn CorrectionService>,
    counter: Arc<dyn TokenCount>,
}

impl Pipeline {
    pub fn new(corrector: Arc<dyn CorrectionService>, counter: Arc<dyn TokenCount>) -> Self {
        Pipeline { corrector, counter }
    }

    /// Reads, chunks, corrects chunk by chunk and assembles the output.
    ///
    /// Chunks are corrected strictly one after another. A transport or parse
    /// failure drops that chunk's paragraphs and the run goes on; a rejected
    /// credential ends the run at once.
    pub async fn run(
        &self,
        source: &SourceDocument,
        options: &RunOptions,
        key: Option<&ApiKey>,
        cancel: &CancelFlag,
        progress: &dyn ProgressSink,
    ) -> Result<RunOutcome, RunError> {
        let key = config::validate(options, key)?;

        progress.update(RunState::Reading);
        let paragraphs = source.paragraphs().map_err(RunError::input)?;
        if paragraphs.is_empty() {
            return Err(RunError::Input(format!("no text found in {}", source.name)));
        }

        progress.update(RunState::Chunking);
        let chunks = chunk_paragraphs(&paragraphs, options.token_budget, self.counter.as_ref());
        info!(
            paragraphs = paragraphs.len(),
            chunks = chunks.len(),
            budget = options.token_budget,
            "created chunks for correction"
        );

        let instructions = build_instructions(options);
        let total = chunks.len();
        let mut report = RunReport {
            total_chunks: total,
            ..RunReport::default()
        };
        let mut merged: Vec<StyledParagraph> = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let index = i + 1;
            progress.update(RunState::Correcting {
                chunk: index,
                total,
            });
            debug!(chunk = index, total, tokens = chunk.tokens, "processing chunk");

            let outcome = self
                .corrector
                .correct(&chunk.text(), &instructions, key)
                .await;

            if cancel.is_cancelled() {
                info!(chunk = index, total, "run cancelled, discarding chunk result");
                progress.update(RunState::Cancelled);
                return Ok(RunOutcome::Cancelled { report });
            }

            match outcome {
                ChunkOutcome::Corrected(paragraphs) => {
                    report.corrected_chunks += 1;
                    merged.extend(paragraphs);
                }
                ChunkOutcome::TransportFailed(reason) => {
                    warn!(chunk = index, total, %reason, "transport failure, chunk omitted");
                    report.failed_chunks.push(index);
                }
                ChunkOutcome::ParseFailed(reason) => {
                    warn!(chunk = index, total, %reason, "unparseable response, chunk omitted");
                    report.failed_chunks.push(index);
                }
                ChunkOutcome::AuthFailed(reason) => {
                    warn!(chunk = index, total, %reason, "credential rejected, aborting run");
                    return Err(RunError::Auth(reason));
                }
            }
        }

        info!(
            total = report.total_chunks,
            corrected = report.corrected_chunks,
            failed = report.failed_chunks.len(),
            "correction finished"
        );

        if merged.is_empty() {
            progress.update(RunState::NothingToWrite);
            return Ok(RunOutcome::NothingToWrite { report });
        }

        progress.update(RunState::Assembling);
        let document = DocumentAssembler::new(options.format).assemble(&merged, &options.title)?;
        report.paragraphs_written = merged.len();

        progress.update(RunState::Done);
        Ok(RunOutcome::Completed { document, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputFormat, StyleTag};
    use crate::services::docx;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Every paragraph costs ten tokens.
    struct Flat;

    impl TokenCount for Flat {
        fn count(&self, _text: &str) -> usize {
            10
        }
    }

    /// Replays scripted outcomes in call order and records each chunk sent.
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<Vec<ChunkOutcome>>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Option<(usize, CancelFlag)>,
    }

    impl Scripted {
        fn new(outcomes: Vec<ChunkOutcome>) -> Self {
            Scripted {
                outcomes: Mutex::new(outcomes.into_iter().rev().collect()),
                ..Scripted::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CorrectionService for Scripted {
        async fn correct(&self, chunk_text: &str, _instructions: &str, _key: &ApiKey) -> ChunkOutcome {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(chunk_text.to_string());
                calls.len()
            };
            if let Some((n, flag)) = &self.cancel_on_call {
                if *n == call {
                    flag.cancel();
                }
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| ChunkOutcome::TransportFailed("script exhausted".into()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RunState>>);

    impl ProgressSink for Recorder {
        fn update(&self, state: RunState) {
            self.0.lock().unwrap().push(state);
        }
    }

    impl Recorder {
        fn states(&self) -> Vec<RunState> {
            self.0.lock().unwrap().clone()
        }
    }

    fn corrected(texts: &[&str]) -> ChunkOutcome {
        ChunkOutcome::Corrected(
            texts
                .iter()
                .map(|t| StyledParagraph::new(*t, StyleTag::Normal))
                .collect(),
        )
    }

    fn text_source(paragraphs: &[&str]) -> SourceDocument {
        SourceDocument::new("book.txt", paragraphs.join("\n\n").into_bytes())
    }

    /// One paragraph per chunk with the flat counter.
    fn one_per_chunk() -> RunOptions {
        RunOptions {
            token_budget: 10,
            ..RunOptions::default()
        }
    }

    fn key() -> ApiKey {
        ApiKey::new("sk-test")
    }

    fn written_texts(outcome: &RunOutcome) -> Vec<String> {
        match outcome {
            RunOutcome::Completed { document, .. } => docx::read_paragraphs(&document.bytes)
                .unwrap()
                .into_iter()
                .map(|p| p.text)
                .collect(),
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrects_a_small_document_end_to_end() {
        let corrector = Arc::new(Scripted::new(vec![corrected(&[
            "The cat sat.",
            "It was raining.",
        ])]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));
        let options = RunOptions {
            token_budget: 5000,
            ..RunOptions::default()
        };

        let outcome = pipeline
            .run(
                &text_source(&["Teh cat sat.", "It was raning."]),
                &options,
                Some(&key()),
                &CancelFlag::default(),
                &(),
            )
            .await
            .unwrap();

        assert_eq!(corrector.calls(), vec!["Teh cat sat.\n\nIt was raning."]);
        assert_eq!(written_texts(&outcome), vec!["The cat sat.", "It was raining."]);

        let RunOutcome::Completed { document, report } = &outcome else {
            unreachable!();
        };
        let styles: Vec<StyleTag> = docx::read_paragraphs(&document.bytes)
            .unwrap()
            .iter()
            .map(docx::DocxParagraph::style_tag)
            .collect();
        assert_eq!(styles, vec![StyleTag::Normal, StyleTag::Normal]);
        assert_eq!(report.total_chunks, 1);
        assert_eq!(report.paragraphs_written, 2);
        assert!(report.failed_chunks.is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_chunk_order_and_skips_failed_chunks() {
        let corrector = Arc::new(Scripted::new(vec![
            corrected(&["A1", "A2"]),
            ChunkOutcome::TransportFailed("timeout".into()),
            corrected(&["C1"]),
            ChunkOutcome::ParseFailed("not json".into()),
            corrected(&["E1"]),
        ]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));

        let outcome = pipeline
            .run(
                &text_source(&["a", "b", "c", "d", "e"]),
                &one_per_chunk(),
                Some(&key()),
                &CancelFlag::default(),
                &(),
            )
            .await
            .unwrap();

        assert_eq!(corrector.calls(), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(written_texts(&outcome), vec!["A1", "A2", "C1", "E1"]);
        assert_eq!(outcome.report().failed_chunks, vec![2, 4]);
        assert_eq!(outcome.report().corrected_chunks, 3);
    }

    #[tokio::test]
    async fn rejected_credential_on_first_chunk_stops_the_run() {
        let corrector = Arc::new(Scripted::new(vec![
            ChunkOutcome::AuthFailed("HTTP 401".into()),
            corrected(&["never"]),
        ]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));
        let recorder = Recorder::default();

        let err = pipeline
            .run(
                &text_source(&["a", "b", "c", "d", "e"]),
                &one_per_chunk(),
                Some(&key()),
                &CancelFlag::default(),
                &recorder,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Auth(_)));
        assert_eq!(corrector.calls().len(), 1);
        let correcting: Vec<RunState> = recorder
            .states()
            .into_iter()
            .filter(|s| matches!(s, RunState::Correcting { .. }))
            .collect();
        assert_eq!(correcting, vec![RunState::Correcting { chunk: 1, total: 5 }]);
    }

    #[tokio::test]
    async fn transport_failure_does_not_stop_later_chunks() {
        let corrector = Arc::new(Scripted::new(vec![
            corrected(&["A"]),
            ChunkOutcome::TransportFailed("connection reset".into()),
            corrected(&["C"]),
            corrected(&["D"]),
            corrected(&["E"]),
        ]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));

        let outcome = pipeline
            .run(
                &text_source(&["a", "b", "c", "d", "e"]),
                &one_per_chunk(),
                Some(&key()),
                &CancelFlag::default(),
                &(),
            )
            .await
            .unwrap();

        assert_eq!(corrector.calls().len(), 5);
        assert_eq!(written_texts(&outcome), vec!["A", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn progress_walks_the_state_machine() {
        let corrector = Arc::new(Scripted::new(vec![corrected(&["A"]), corrected(&["B"])]));
        let pipeline = Pipeline::new(corrector, Arc::new(Flat));
        let recorder = Recorder::default();

        pipeline
            .run(
                &text_source(&["a", "b"]),
                &one_per_chunk(),
                Some(&key()),
                &CancelFlag::default(),
                &recorder,
            )
            .await
            .unwrap();

        assert_eq!(
            recorder.states(),
            vec![
                RunState::Reading,
                RunState::Chunking,
                RunState::Correcting { chunk: 1, total: 2 },
                RunState::Correcting { chunk: 2, total: 2 },
                RunState::Assembling,
                RunState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_lets_the_call_finish_then_stops() {
        let cancel = CancelFlag::default();
        let corrector = Arc::new(Scripted {
            cancel_on_call: Some((2, cancel.clone())),
            ..Scripted::new(vec![corrected(&["A"]), corrected(&["B"]), corrected(&["C"])])
        });
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));
        let recorder = Recorder::default();

        let outcome = pipeline
            .run(
                &text_source(&["a", "b", "c"]),
                &one_per_chunk(),
                Some(&key()),
                &cancel,
                &recorder,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled { .. }));
        assert_eq!(corrector.calls().len(), 2);
        assert_eq!(outcome.report().corrected_chunks, 1);
        assert_eq!(recorder.states().last(), Some(&RunState::Cancelled));
        assert!(!recorder.states().contains(&RunState::Assembling));
    }

    #[tokio::test]
    async fn all_chunks_failing_means_nothing_to_write() {
        let corrector = Arc::new(Scripted::new(vec![
            ChunkOutcome::ParseFailed("x".into()),
            ChunkOutcome::TransportFailed("y".into()),
        ]));
        let pipeline = Pipeline::new(corrector, Arc::new(Flat));

        let outcome = pipeline
            .run(
                &text_source(&["a", "b"]),
                &one_per_chunk(),
                Some(&key()),
                &CancelFlag::default(),
                &(),
            )
            .await
            .unwrap();

        match outcome {
            RunOutcome::NothingToWrite { report } => assert_eq!(report.failed_chunks, vec![1, 2]),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_document_fails_before_any_request() {
        let corrector = Arc::new(Scripted::new(vec![]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));

        let err = pipeline
            .run(
                &SourceDocument::new("blank.txt", b"  \n\n  ".to_vec()),
                &RunOptions::default(),
                Some(&key()),
                &CancelFlag::default(),
                &(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Input(_)));
        assert!(corrector.calls().is_empty());
    }

    #[tokio::test]
    async fn bad_configuration_fails_before_reading() {
        let corrector = Arc::new(Scripted::new(vec![]));
        let pipeline = Pipeline::new(corrector.clone(), Arc::new(Flat));
        let recorder = Recorder::default();
        let options = RunOptions {
            token_budget: 0,
            ..RunOptions::default()
        };

        let err = pipeline
            .run(&text_source(&["a"]), &options, Some(&key()), &CancelFlag::default(), &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Config(_)));

        let err = pipeline
            .run(&text_source(&["a"]), &RunOptions::default(), None, &CancelFlag::default(), &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Config(_)));

        assert!(recorder.states().is_empty());
        assert!(corrector.calls().is_empty());
    }

    #[tokio::test]
    async fn epub_output_uses_requested_format() {
        let corrector = Arc::new(Scripted::new(vec![corrected(&["Fine."])]));
        let pipeline = Pipeline::new(corrector, Arc::new(Flat));
        let options = RunOptions {
            format: OutputFormat::Epub,
            ..RunOptions::default()
        };

        let outcome = pipeline
            .run(&text_source(&["Fine"]), &options, Some(&key()), &CancelFlag::default(), &())
            .await
            .unwrap();
        match outcome {
            RunOutcome::Completed { document, .. } => assert_eq!(document.format, OutputFormat::Epub),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
