use crate::error::ControllerError;
use crate::query_execution::QueryOutcome;
use crate::script_cache::{ScriptCache, ScriptCacheError};

/// The statement around byte `offset`: text between the nearest `;` (or the
/// start/end of `text`) on either side, trimmed.
#[must_use]
pub fn statement_at(text: &str, offset: usize) -> &str {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let start = text[..offset].rfind(';').map_or(0, |index| index + 1);
    let end = text[offset..]
        .find(';')
        .map_or(text.len(), |index| offset + index);
    text[start..end].trim()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdHocRun {
    Idle,
    Running { query: String, elapsed: Option<u64> },
    Finished { query: String, outcome: QueryOutcome },
    Failed { query: String, error: ControllerError },
}

/// SQL scratch buffer for one database, persisted through [`ScriptCache`].
#[derive(Debug)]
pub struct AdHocEditor {
    scripts: Option<ScriptCache>,
    profile: String,
    database: String,
    text: String,
    cursor: usize,
    run: AdHocRun,
}

impl AdHocEditor {
    /// Loads the saved script, if any. A read failure leaves the editor empty.
    #[must_use]
    pub fn open(scripts: Option<ScriptCache>, profile: &str, database: &str) -> Self {
        let text = match scripts.as_ref().map(|cache| cache.load(profile, database)) {
            Some(Ok(Some(text))) => text,
            Some(Err(error)) => {
                tracing::warn!(%error, "failed to load saved script");
                String::new()
            }
            Some(Ok(None)) | None => String::new(),
        };
        let cursor = text.len();
        Self {
            scripts,
            profile: profile.to_string(),
            database: database.to_string(),
            text,
            cursor,
            run: AdHocRun::Idle,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn run_state(&self) -> &AdHocRun {
        &self.run
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.run, AdHocRun::Running { .. })
    }

    /// Replaces the buffer and moves the cursor to its end.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cursor = self.text.len();
    }

    pub fn set_cursor(&mut self, offset: usize) {
        let mut offset = offset.min(self.text.len());
        while !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        self.cursor = offset;
    }

    pub fn insert_char(&mut self, c: char) {
        self.text.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    pub fn backspace(&mut self) {
        if let Some(previous) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= previous.len_utf8();
            self.text.remove(self.cursor);
        }
    }

    pub fn move_left(&mut self) {
        if let Some(previous) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= previous.len_utf8();
        }
    }

    pub fn move_right(&mut self) {
        if let Some(next) = self.text[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }

    #[must_use]
    pub fn current_statement(&self) -> &str {
        statement_at(&self.text, self.cursor)
    }

    /// The last query run, for retrying.
    #[must_use]
    pub fn last_query(&self) -> Option<&str> {
        match &self.run {
            AdHocRun::Idle => None,
            AdHocRun::Running { query, .. }
            | AdHocRun::Finished { query, .. }
            | AdHocRun::Failed { query, .. } => Some(query),
        }
    }

    pub fn save(&self) -> Result<(), ScriptCacheError> {
        match &self.scripts {
            Some(cache) => cache.save(&self.profile, &self.database, &self.text),
            None => Ok(()),
        }
    }

    pub(crate) fn begin(&mut self, query: String) {
        self.run = AdHocRun::Running {
            query,
            elapsed: None,
        };
    }

    pub(crate) fn progress(&mut self, elapsed_secs: u64) {
        if let AdHocRun::Running { elapsed, .. } = &mut self.run {
            *elapsed = Some(elapsed_secs);
        }
    }

    pub(crate) fn finish(&mut self, result: Result<QueryOutcome, ControllerError>) {
        let query = self.last_query().unwrap_or_default().to_string();
        self.run = match result {
            Ok(outcome) => AdHocRun::Finished { query, outcome },
            Err(error) => AdHocRun::Failed { query, error },
        };
    }

    /// One-line summary of the run state.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        match &self.run {
            AdHocRun::Idle => None,
            AdHocRun::Running { elapsed: None, .. } => Some("running...".to_string()),
            AdHocRun::Running {
                elapsed: Some(elapsed),
                ..
            } => Some(format!("running... {elapsed}s")),
            AdHocRun::Finished { outcome, .. } if outcome.is_empty() => {
                Some("empty resultset".to_string())
            }
            AdHocRun::Finished { outcome, .. } => Some(format!("{} rows", outcome.rows().len())),
            AdHocRun::Failed { error, .. } => Some(error.to_string()),
        }
    }
}
