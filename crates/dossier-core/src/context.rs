//! Per-run context: identity, reference documents, config, cancellation, observer.
//!
//! Constructed once at pipeline start and passed down explicitly; nothing in
//! the pipeline reaches for process-wide state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::PipelineConfig;
use crate::error::DossierResult;
use crate::progress::{self, ProgressEvent, SharedObserver};
use crate::subject::SubjectProfile;

/// Named reference documents (style guides, exemplars) loaded for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonLibrary {
    docs: BTreeMap<String, String>,
}

impl CanonLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `.md` and `.txt` file in `dir`, keyed by file stem.
    pub fn load_dir(dir: &Path) -> DossierResult<Self> {
        let mut docs = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_text = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if !path.is_file() || !is_text {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)?;
            debug!(doc = %name, chars = body.len(), "canon document loaded");
            docs.insert(name, body);
        }
        Ok(CanonLibrary { docs })
    }

    pub fn with_doc(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.docs.insert(name.into(), body.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.docs.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.docs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub subject: SubjectProfile,
    pub canon: Arc<CanonLibrary>,
    pub config: PipelineConfig,
    pub cancel: CancelSignal,
    observer: SharedObserver,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("subject", &self.subject.name)
            .field("canon_docs", &self.canon.len())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(subject: SubjectProfile, config: PipelineConfig) -> Self {
        RunContext {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            subject,
            canon: Arc::new(CanonLibrary::new()),
            config,
            cancel: CancelSignal::never(),
            observer: progress::noop(),
        }
    }

    pub fn with_canon(mut self, canon: CanonLibrary) -> Self {
        self.canon = Arc::new(canon);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.observer.on_event(event);
    }

    pub fn observer(&self) -> &SharedObserver {
        &self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_dir_reads_text_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("voice.md"), "# Voice guide").unwrap();
        std::fs::write(dir.path().join("exemplar.txt"), "Exemplar profile").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir(dir.path().join("nested.md")).unwrap();

        let canon = CanonLibrary::load_dir(dir.path()).unwrap();
        assert_eq!(canon.names().collect::<Vec<_>>(), vec!["exemplar", "voice"]);
        assert_eq!(canon.get("voice"), Some("# Voice guide"));
    }

    #[test]
    fn test_load_dir_missing_is_io_error() {
        let err = CanonLibrary::load_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, crate::error::DossierError::Io(_)));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::new(SubjectProfile::new("A B"), PipelineConfig::default());
        let b = RunContext::new(SubjectProfile::new("A B"), PipelineConfig::default());
        assert_ne!(a.run_id, b.run_id);
        assert!(!a.cancel.is_cancelled());
    }
}
