//! One minification job on its own thread.
//!
//! The worker reads and checks its source first, then tells the builder
//! whether output will follow (the readiness handshake). Only after
//! [`Readiness::Ready`] does the builder start draining the pipe, so a
//! skipped or failed job never touches its destination. The pipe writer
//! is owned by the thread and is either finished or dropped on every exit
//! path, which always releases the reader.

use std::any::Any;
use std::io::{self, Read};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver, Sender};
use tracing::debug;

use crate::bridge::PipeWriter;
use crate::diagnostics::DiagnosticReporter;
use crate::error::BuildError;
use crate::minifier::{self, EncodingWriter, Escape, ExtraArtifact, MinifyInput};
use crate::resource::ResourcePath;
use crate::strategy::Strategy;

/// What a worker needs: the source stream, names and charsets, the strategy
pub struct WorkerJob {
    pub source: ResourcePath,
    pub destination: ResourcePath,
    pub strategy: Strategy,
    pub content: Box<dyn Read + Send>,
    pub source_charset: String,
    /// Charset of the existing destination, if there is one
    pub destination_charset: Option<String>,
}

/// Sent once, before any byte goes into the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Output follows, encoded in `charset`
    Ready { charset: String },
    /// Source had errors; nothing will be written
    Skipped,
    /// The worker failed before producing output
    Failed,
}

/// Result of a joined worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Written {
        charset: String,
        bytes: u64,
        extras: Vec<ExtraArtifact>,
    },
    Skipped,
}

/// Handle to a running worker thread
pub struct Worker {
    source: ResourcePath,
    ready: Receiver<Readiness>,
    handle: JoinHandle<Result<WorkerOutcome, BuildError>>,
}

impl Worker {
    /// Start `job` on a new thread writing into `writer`
    pub fn spawn(
        job: WorkerJob,
        writer: PipeWriter,
        reporter: DiagnosticReporter,
    ) -> io::Result<Self> {
        let source = job.source.clone();
        let (ready_tx, ready) = bounded(1);
        let handle = thread::Builder::new()
            .name(format!("minify {}", job.source.file_name()))
            .spawn(move || run(job, writer, &reporter, &ready_tx))?;
        Ok(Self {
            source,
            ready,
            handle,
        })
    }

    /// Block until the worker has checked its source.
    ///
    /// A worker that died before answering counts as failed; `join`
    /// reports why.
    pub fn ready(&self) -> Readiness {
        self.ready.recv().unwrap_or(Readiness::Failed)
    }

    /// Wait for the thread and take its outcome
    pub fn join(self) -> Result<WorkerOutcome, BuildError> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => Err(BuildError::WorkerPanicked {
                path: self.source,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run(
    job: WorkerJob,
    writer: PipeWriter,
    reporter: &DiagnosticReporter,
    ready: &Sender<Readiness>,
) -> Result<WorkerOutcome, BuildError> {
    let escape = Escape::for_strategy(&job.strategy);
    // A closed receiver means the builder gave up on this job
    let (prepared, input, charset) = match prepare(job, reporter) {
        Ok(Some(parts)) => parts,
        Ok(None) => {
            let _ = ready.send(Readiness::Skipped);
            debug!(path = %reporter.file(), "skipped, source has errors");
            return Ok(WorkerOutcome::Skipped);
        }
        Err(e) => {
            let _ = ready.send(Readiness::Failed);
            return Err(e);
        }
    };
    let _ = ready.send(Readiness::Ready {
        charset: charset.clone(),
    });

    let mut sink = EncodingWriter::new(writer, input.output_encoding, escape);
    let extras = prepared.emit(&mut sink).map_err(|e| BuildError::Pipe {
        path: input.destination.clone(),
        source: e,
    })?;
    let bytes = sink
        .finish()
        .and_then(PipeWriter::finish)
        .map_err(|e| BuildError::Pipe {
            path: input.destination.clone(),
            source: e,
        })?;
    debug!(path = %input.source, bytes, %charset, "minified");

    Ok(WorkerOutcome::Written {
        charset,
        bytes,
        extras,
    })
}

/// Read, decode and check the source. None means skipped.
fn prepare(
    mut job: WorkerJob,
    reporter: &DiagnosticReporter,
) -> Result<Option<(minifier::Prepared, MinifyInput, String)>, BuildError> {
    let source_encoding =
        minifier::lookup_charset(&job.source_charset).ok_or_else(|| BuildError::UnknownCharset {
            path: job.source.clone(),
            label: job.source_charset.clone(),
        })?;
    let charset = minifier::output_charset(
        &job.strategy,
        &job.source_charset,
        job.destination_charset.as_deref(),
    );
    let output_encoding =
        minifier::lookup_charset(&charset).ok_or_else(|| BuildError::UnknownCharset {
            path: job.destination.clone(),
            label: charset.clone(),
        })?;

    let mut bytes = Vec::new();
    job.content
        .read_to_end(&mut bytes)
        .map_err(|e| BuildError::SourceRead {
            path: job.source.clone(),
            source: e,
        })?;

    let input = MinifyInput {
        source: job.source,
        destination: job.destination,
        text: minifier::decode(&bytes, source_encoding),
        output_encoding,
    };
    let prepared =
        minifier::prepare(&job.strategy, &input, reporter).map_err(|message| BuildError::Minify {
            path: input.source.clone(),
            message,
        })?;
    Ok(prepared.map(|prepared| (prepared, input, charset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::pipe;
    use crate::diagnostics::DiagnosticSink;
    use crate::strategy::{ClosureOptions, YuiOptions};
    use std::io::Cursor;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::new(s).unwrap()
    }

    fn job(source: &str, strategy: Strategy, content: &str) -> WorkerJob {
        let source = p(source);
        WorkerJob {
            destination: source.minified().unwrap(),
            source,
            strategy,
            content: Box::new(Cursor::new(content.as_bytes().to_vec())),
            source_charset: "UTF-8".to_string(),
            destination_charset: None,
        }
    }

    struct FailingRead;

    impl Read for FailingRead {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    // ==================== worker tests ====================

    #[test]
    fn test_css_worker_streams_output() {
        let sink = DiagnosticSink::new();
        let (writer, mut reader) = pipe(2, 4);
        let worker = Worker::spawn(
            job("style.css", Strategy::CssCompress, "a { color: red; }"),
            writer,
            sink.reporter(p("style.css")),
        )
        .unwrap();

        assert_eq!(
            worker.ready(),
            Readiness::Ready {
                charset: "UTF-8".to_string()
            }
        );
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        let outcome = worker.join().unwrap();

        assert_eq!(out, "a{color:red}");
        assert!(matches!(outcome, WorkerOutcome::Written { bytes: 12, .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_yui_syntax_error_is_skipped() {
        let sink = DiagnosticSink::new();
        let (writer, _reader) = pipe(2, 4);
        let worker = Worker::spawn(
            job(
                "app.js",
                Strategy::JsCompress(YuiOptions::default()),
                "var a = 'oops;\n",
            ),
            writer,
            sink.reporter(p("app.js")),
        )
        .unwrap();

        assert_eq!(worker.ready(), Readiness::Skipped);
        assert_eq!(worker.join().unwrap(), WorkerOutcome::Skipped);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_unreadable_source_fails_before_output() {
        let sink = DiagnosticSink::new();
        let (writer, mut reader) = pipe(2, 4);
        let mut job = job("style.css", Strategy::CssCompress, "");
        job.content = Box::new(FailingRead);
        let worker = Worker::spawn(job, writer, sink.reporter(p("style.css"))).unwrap();

        assert_eq!(worker.ready(), Readiness::Failed);
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
        assert!(matches!(
            worker.join().unwrap_err(),
            BuildError::SourceRead { .. }
        ));
    }

    #[test]
    fn test_unknown_source_charset_fails() {
        let sink = DiagnosticSink::new();
        let (writer, _reader) = pipe(2, 4);
        let mut job = job("style.css", Strategy::CssCompress, "a{}");
        job.source_charset = "no-such-charset".to_string();
        let worker = Worker::spawn(job, writer, sink.reporter(p("style.css"))).unwrap();

        assert_eq!(worker.ready(), Readiness::Failed);
        assert!(matches!(
            worker.join().unwrap_err(),
            BuildError::UnknownCharset { .. }
        ));
    }

    #[test]
    fn test_closure_worker_declares_ascii_charset() {
        let sink = DiagnosticSink::new();
        let (writer, mut reader) = pipe(2, 4);
        let worker = Worker::spawn(
            job(
                "app.js",
                Strategy::Closure(ClosureOptions::default()),
                "var s = \"é\";\n",
            ),
            writer,
            sink.reporter(p("app.js")),
        )
        .unwrap();

        let readiness = worker.ready();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        worker.join().unwrap();

        assert_eq!(
            readiness,
            Readiness::Ready {
                charset: "US-ASCII".to_string()
            }
        );
        assert!(out.is_ascii());
    }

    #[test]
    fn test_existing_destination_charset_wins() {
        let sink = DiagnosticSink::new();
        let (writer, mut reader) = pipe(2, 4);
        let mut job = job(
            "app.js",
            Strategy::JsCompress(YuiOptions::default()),
            "var café = 1;",
        );
        job.destination_charset = Some("ISO-8859-1".to_string());
        let worker = Worker::spawn(job, writer, sink.reporter(p("app.js"))).unwrap();

        worker.ready();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        let outcome = worker.join().unwrap();

        assert!(out.contains(&0xE9));
        assert!(!out.windows(2).any(|pair| *pair == [0xC3, 0xA9]));
        assert!(matches!(outcome, WorkerOutcome::Written { charset, .. } if charset == "ISO-8859-1"));
    }

    #[test]
    fn test_css_unmappable_character_escaped() {
        let sink = DiagnosticSink::new();
        let (writer, mut reader) = pipe(2, 4);
        let mut job = job("style.css", Strategy::CssCompress, "a::before { content: \"→\"; }");
        job.destination_charset = Some("ISO-8859-1".to_string());
        let worker = Worker::spawn(job, writer, sink.reporter(p("style.css"))).unwrap();

        worker.ready();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        worker.join().unwrap();

        assert!(out.contains("\\002192 "), "{out}");
        assert!(!out.contains("&#"), "{out}");
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
