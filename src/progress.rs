//! Initialization progress reporting.
//!
//! Reports what `srag init` is doing (discovering summaries, embedding
//! batch n of m, loading persisted state) so users see how much is left.
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event emitted by `KnowledgeBase::initialize`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitProgressEvent {
    /// Walking the summaries root. Total unknown.
    Discovering { root: String },
    /// A batch finished embedding.
    Embedding {
        batch: u64,
        batches: u64,
        files_done: u64,
        total: u64,
    },
    /// Persisted state matched the directory and was loaded without embedding.
    Loaded { documents: u64 },
}

/// Reports init progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: InitProgressEvent);
}

/// Human-friendly progress: `init  embedding  batch 3 / 12  (30 / 117 files)`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: InitProgressEvent) {
        let line = match &event {
            InitProgressEvent::Discovering { root } => format!("init {}  discovering...\n", root),
            InitProgressEvent::Embedding {
                batch,
                batches,
                files_done,
                total,
            } => format!(
                "init  embedding  batch {} / {}  ({} / {} files)\n",
                batch,
                batches,
                format_number(*files_done),
                format_number(*total)
            ),
            InitProgressEvent::Loaded { documents } => format!(
                "init  loaded {} documents from saved state\n",
                format_number(*documents)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: InitProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &InitProgressEvent) -> serde_json::Value {
    match event {
        InitProgressEvent::Discovering { root } => serde_json::json!({
            "event": "progress",
            "phase": "discovering",
            "root": root
        }),
        InitProgressEvent::Embedding {
            batch,
            batches,
            files_done,
            total,
        } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "batch": batch,
            "batches": batches,
            "n": files_done,
            "total": total
        }),
        InitProgressEvent::Loaded { documents } => serde_json::json!({
            "event": "progress",
            "phase": "loaded",
            "documents": documents
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: InitProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
