mod profile_form;

use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use sqlnav_core::adhoc::{AdHocEditor, AdHocRun};
use sqlnav_core::context::AppContext;
use sqlnav_core::database::{BrowserEntry, DatabaseController, ListingState};
use sqlnav_core::dispatcher::{UiEvent, UiQueue};
use sqlnav_core::error::ControllerError;
use sqlnav_core::object::{ObjectController, ObjectState};
use sqlnav_core::profiles::{FileProfilesStore, ProfileDraft};
use sqlnav_core::query_execution::QueryOutcome;
use sqlnav_core::session::SessionController;
use sqlnav_core::tabular::{Alignment, Cell, ColumnHeader};
use thiserror::Error;

use crate::profile_form::{FormField, ProfileForm};

const TICK_RATE: Duration = Duration::from_millis(120);
const MAX_COLUMN_WIDTH: usize = 40;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Connections,
    Databases,
    Objects,
    Content,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Self::Connections => Self::Databases,
            Self::Databases => Self::Objects,
            Self::Objects => Self::Content,
            Self::Content => Self::Connections,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Connections => Self::Content,
            Self::Databases => Self::Connections,
            Self::Objects => Self::Databases,
            Self::Content => Self::Objects,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Connections => "Connections",
            Self::Databases => "Databases",
            Self::Objects => "Objects",
            Self::Content => "Content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentView {
    Data,
    Structure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    NextPane,
    PreviousPane,
    Submit,
    Cancel,
    Retry,
    Disconnect,
    RunStatement,
    Rerun,
    SaveScript,
    ToggleView,
    NewProfile,
    EditProfile,
    DuplicateProfile,
    DeleteProfile,
    Navigate(DirectionKey),
    Input(char),
    Backspace,
    Tick,
}

struct TuiApp {
    context: Arc<AppContext>,
    queue: UiQueue,
    store: FileProfilesStore,
    sessions: Vec<SessionController>,
    form: Option<ProfileForm>,
    /// Profile named by a first `x`; a second `x` deletes it.
    pending_delete: Option<String>,
    pane: Pane,
    connection_index: usize,
    database_cursor: usize,
    object_cursor: usize,
    content_view: ContentView,
    content_offset: usize,
    show_help: bool,
    should_quit: bool,
    status_line: Option<String>,
}

impl TuiApp {
    fn new(context: Arc<AppContext>, queue: UiQueue, store: FileProfilesStore) -> Self {
        let sessions = store
            .profiles()
            .iter()
            .cloned()
            .map(|profile| SessionController::new(Arc::clone(&context), profile))
            .collect::<Vec<_>>();
        let status_line = sessions
            .is_empty()
            .then(|| format!("no connections configured in {}", store.path().display()));

        Self {
            context,
            queue,
            store,
            sessions,
            form: None,
            pending_delete: None,
            pane: Pane::Connections,
            connection_index: 0,
            database_cursor: 0,
            object_cursor: 0,
            content_view: ContentView::Data,
            content_offset: 0,
            show_help: false,
            should_quit: false,
            status_line,
        }
    }

    fn handle(&mut self, msg: Msg) {
        if !matches!(msg, Msg::DeleteProfile | Msg::Tick) {
            self.pending_delete = None;
        }
        if self.handle_form(msg) {
            return;
        }

        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::NextPane => self.pane = self.pane.next(),
            Msg::PreviousPane => self.pane = self.pane.previous(),
            Msg::Submit => self.submit(),
            Msg::Cancel => self.cancel(),
            Msg::Retry => self.retry(),
            Msg::Disconnect => self.disconnect(),
            Msg::RunStatement => self.run_statement(false),
            Msg::Rerun => self.run_statement(true),
            Msg::SaveScript => self.save_script(),
            Msg::ToggleView => {
                self.content_view = match self.content_view {
                    ContentView::Data => ContentView::Structure,
                    ContentView::Structure => ContentView::Data,
                };
                self.content_offset = 0;
            }
            Msg::NewProfile => self.open_form(|_| Some(ProfileDraft::default())),
            Msg::EditProfile => {
                self.open_form(|session| session.map(|s| ProfileDraft::edit(s.profile())));
            }
            Msg::DuplicateProfile => {
                self.open_form(|session| session.map(|s| ProfileDraft::duplicate(s.profile())));
            }
            Msg::DeleteProfile => self.delete_profile(),
            Msg::Navigate(direction) => self.navigate(direction),
            Msg::Input(c) => {
                if let Some(editor) = self.editor_mut() {
                    editor.insert_char(c);
                }
            }
            Msg::Backspace => {
                if let Some(editor) = self.editor_mut() {
                    editor.backspace();
                }
            }
            Msg::Tick => self.drain_events(),
        }
    }

    /// Keys while the profile form is open. Returns false for messages the
    /// app still handles itself.
    fn handle_form(&mut self, msg: Msg) -> bool {
        let Some(form) = self.form.as_mut() else {
            return false;
        };
        match msg {
            Msg::NextPane | Msg::Navigate(DirectionKey::Down) => form.next_field(),
            Msg::PreviousPane | Msg::Navigate(DirectionKey::Up) => form.previous_field(),
            Msg::Navigate(DirectionKey::Left) => form.cycle(false),
            Msg::Navigate(DirectionKey::Right) => form.cycle(true),
            Msg::Input('\n') | Msg::Submit => self.save_form(),
            Msg::Input(c) => form.insert_char(c),
            Msg::Backspace => form.backspace(),
            Msg::Cancel => {
                self.form = None;
                self.status_line = Some("edit discarded".to_string());
            }
            Msg::Quit | Msg::Tick => return false,
            _ => {}
        }
        true
    }

    fn open_form(&mut self, draft: impl FnOnce(Option<&SessionController>) -> Option<ProfileDraft>) {
        if self.pane != Pane::Connections {
            return;
        }
        if let Some(draft) = draft(self.session()) {
            self.form = Some(ProfileForm::new(draft));
            self.status_line = None;
        }
    }

    fn save_form(&mut self) {
        let Some(form) = &self.form else {
            return;
        };
        let mut store = self.store.clone();
        let profile = match store.apply_draft(form.draft()) {
            Ok(profile) => profile,
            Err(error) => {
                self.status_line = Some(error.to_string());
                return;
            }
        };
        if !self.commit_store(store) {
            return;
        }

        tracing::info!(profile = %profile.name, "connection profile saved");
        self.form = None;
        self.connection_index = self
            .sessions
            .iter()
            .position(|session| session.profile().name == profile.name)
            .unwrap_or(0);
        self.status_line = Some(format!("saved connection `{}`", profile.name));
    }

    fn delete_profile(&mut self) {
        if self.pane != Pane::Connections {
            return;
        }
        let Some(name) = self.session().map(|session| session.profile().name.clone()) else {
            return;
        };
        if self.pending_delete.as_deref() != Some(name.as_str()) {
            self.status_line = Some(format!("press x again to delete `{name}`"));
            self.pending_delete = Some(name);
            return;
        }

        self.pending_delete = None;
        let mut store = self.store.clone();
        store.delete_profile(&name);
        if self.commit_store(store) {
            tracing::info!(profile = %name, "connection profile deleted");
            self.status_line = Some(format!("deleted connection `{name}`"));
        }
    }

    /// Writes `store` to disk and adopts it. On failure the current profiles
    /// stay in place.
    fn commit_store(&mut self, store: FileProfilesStore) -> bool {
        if let Err(error) = store.persist() {
            tracing::warn!(%error, "failed to save connections");
            self.status_line = Some(error.to_string());
            return false;
        }
        self.store = store;
        self.sync_sessions();
        true
    }

    /// Rebuilds the session list from the store. Sessions whose profile is
    /// unchanged are kept; the rest are disconnected.
    fn sync_sessions(&mut self) {
        let mut previous = std::mem::take(&mut self.sessions);
        self.sessions = self
            .store
            .profiles()
            .iter()
            .map(|profile| {
                match previous
                    .iter()
                    .position(|session| session.profile() == profile)
                {
                    Some(index) => previous.swap_remove(index),
                    None => SessionController::new(Arc::clone(&self.context), profile.clone()),
                }
            })
            .collect();
        for mut session in previous {
            session.disconnect();
        }

        self.connection_index = self
            .connection_index
            .min(self.sessions.len().saturating_sub(1));
        self.database_cursor = 0;
        self.object_cursor = 0;
        self.content_offset = 0;
    }

    /// Hands queued worker events to the controller that started them.
    fn drain_events(&mut self) {
        for event in self.queue.drain() {
            self.route(event);
        }
    }

    fn route(&mut self, event: UiEvent) {
        match self
            .sessions
            .iter_mut()
            .find(|session| session.id() == event.session)
        {
            Some(session) => session.apply(event),
            None => {
                tracing::debug!(event = %event.session, "discarding event for a closed session");
                self.context.discard(event.payload);
            }
        }
    }

    fn session(&self) -> Option<&SessionController> {
        self.sessions.get(self.connection_index)
    }

    fn session_mut(&mut self) -> Option<&mut SessionController> {
        self.sessions.get_mut(self.connection_index)
    }

    fn database(&self) -> Option<&DatabaseController> {
        self.session()?.selected_database()
    }

    fn database_mut(&mut self) -> Option<&mut DatabaseController> {
        self.session_mut()?.selected_database_mut()
    }

    fn selected_entry(&self) -> Option<&BrowserEntry> {
        self.database()?.selected_entry()
    }

    fn editor_mut(&mut self) -> Option<&mut AdHocEditor> {
        if self.pane != Pane::Content {
            return None;
        }
        let database = self.database_mut()?;
        if !matches!(database.selected_entry(), Some(BrowserEntry::AdHoc(_))) {
            return None;
        }
        database.editor_mut()
    }

    fn is_editing(&self) -> bool {
        self.form.is_some()
            || self.pane == Pane::Content && matches!(self.selected_entry(), Some(BrowserEntry::AdHoc(_)))
    }

    fn submit(&mut self) {
        let outcome = match self.pane {
            Pane::Connections => {
                let result = self.session_mut().map(SessionController::connect);
                if let Some(Err(ControllerError::AlreadyConnected { .. })) = result {
                    self.pane = Pane::Databases;
                    return;
                }
                self.database_cursor = 0;
                result
            }
            Pane::Databases => {
                let index = self.database_cursor;
                let result = self.session_mut().map(|session| session.select_database(index));
                if matches!(result, Some(Ok(()))) {
                    self.object_cursor = 0;
                    self.pane = Pane::Objects;
                }
                result
            }
            Pane::Objects => {
                let index = self.object_cursor;
                if let Some(database) = self.database_mut() {
                    database.select(index);
                    self.content_offset = 0;
                    self.pane = Pane::Content;
                }
                None
            }
            Pane::Content => None,
        };

        self.status_line = match outcome {
            Some(Err(error)) => Some(error.to_string()),
            _ => None,
        };
    }

    fn cancel(&mut self) {
        let cancelled = match self.pane {
            Pane::Connections => self.session_mut().is_some_and(SessionController::cancel),
            Pane::Databases | Pane::Objects => match self.database_mut() {
                Some(database) => database.cancel(),
                None => self.session_mut().is_some_and(SessionController::cancel),
            },
            Pane::Content => match self.selected_entry() {
                Some(BrowserEntry::AdHoc(_)) => {
                    self.database_mut().is_some_and(DatabaseController::cancel)
                }
                Some(entry) => entry.object().is_some_and(ObjectController::cancel),
                None => false,
            },
        };
        self.status_line = Some(if cancelled {
            "cancel requested".to_string()
        } else {
            "nothing to cancel".to_string()
        });
    }

    fn retry(&mut self) {
        let result = match self.pane {
            Pane::Connections => self.session_mut().map(SessionController::retry),
            Pane::Databases | Pane::Objects => self.database_mut().map(DatabaseController::retry),
            Pane::Content => {
                let retried = self
                    .selected_entry()
                    .and_then(BrowserEntry::object)
                    .is_some_and(ObjectController::retry);
                if !retried {
                    self.status_line = Some("nothing to retry".to_string());
                    return;
                }
                None
            }
        };
        self.status_line = match result {
            Some(Err(error)) => Some(error.to_string()),
            _ => None,
        };
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session_mut() {
            session.disconnect();
        }
        self.database_cursor = 0;
        self.object_cursor = 0;
        self.content_offset = 0;
        self.pane = Pane::Connections;
        self.status_line = None;
    }

    fn run_statement(&mut self, rerun: bool) {
        if !self.is_editing() {
            return;
        }
        let result = self.database_mut().map(|database| {
            if rerun {
                database.rerun()
            } else {
                database.run_statement()
            }
        });
        self.content_offset = 0;
        self.status_line = match result {
            Some(Err(error)) => Some(error.to_string()),
            _ => None,
        };
    }

    fn save_script(&mut self) {
        let Some(editor) = self.editor_mut() else {
            return;
        };
        let status = match editor.save() {
            Ok(()) => "script saved".to_string(),
            Err(error) => {
                tracing::warn!(%error, "failed to save script");
                error.to_string()
            }
        };
        self.status_line = Some(status);
    }

    fn navigate(&mut self, direction: DirectionKey) {
        if let Some(editor) = self.editor_mut() {
            match direction {
                DirectionKey::Left => editor.move_left(),
                DirectionKey::Right => editor.move_right(),
                DirectionKey::Up | DirectionKey::Down => {}
            }
            return;
        }

        let len = match self.pane {
            Pane::Connections => self.sessions.len(),
            Pane::Databases => self.session().map_or(0, |session| session.databases().len()),
            Pane::Objects => self.database().map_or(0, |database| database.entries().len()),
            Pane::Content => self.content_rows(),
        };
        let cursor = match self.pane {
            Pane::Connections => &mut self.connection_index,
            Pane::Databases => &mut self.database_cursor,
            Pane::Objects => &mut self.object_cursor,
            Pane::Content => &mut self.content_offset,
        };
        *cursor = step(*cursor, len, direction);

        if self.pane == Pane::Connections {
            self.database_cursor = 0;
            self.object_cursor = 0;
            self.status_line = None;
        }
    }

    fn content_rows(&self) -> usize {
        match self.selected_entry() {
            Some(BrowserEntry::AdHoc(editor)) => match editor.run_state() {
                AdHocRun::Finished { outcome, .. } => outcome.rows().len(),
                _ => 0,
            },
            Some(entry) => entry.object().map_or(0, |object| match self.content_view {
                ContentView::Data => object.rows().map_or(0, |rows| rows.rows().len()),
                ContentView::Structure => object
                    .structure()
                    .map_or(0, |structure| structure.columns.len()),
            }),
            None => 0,
        }
    }

    fn status_text(&self) -> String {
        if let Some(status) = &self.status_line {
            return status.clone();
        }
        let with_progress = |status: Option<&str>, progress: Option<u64>| {
            status.map(|status| match progress {
                Some(elapsed) => format!("{status} {elapsed}s"),
                None => status.to_string(),
            })
        };
        let from_database = self
            .database()
            .and_then(|database| with_progress(database.status(), database.progress()));
        let from_session = self
            .session()
            .and_then(|session| with_progress(session.status(), session.progress()));
        from_database.or(from_session).unwrap_or_default()
    }

    fn shutdown(&mut self) {
        for session in &mut self.sessions {
            session.disconnect();
        }
    }
}

fn step(cursor: usize, len: usize, direction: DirectionKey) -> usize {
    if len == 0 {
        return 0;
    }
    match direction {
        DirectionKey::Up | DirectionKey::Left => cursor.saturating_sub(1),
        DirectionKey::Down | DirectionKey::Right => (cursor + 1).min(len - 1),
    }
}

/// Runs the terminal UI until the user quits. Sessions still open at exit
/// are closed on the context's runtime.
pub fn run(
    context: Arc<AppContext>,
    queue: UiQueue,
    store: FileProfilesStore,
) -> Result<(), TuiError> {
    let mut app = TuiApp::new(context, queue, store);
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);
    app.shutdown();

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.is_editing()) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let session = app.session();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", app.pane.title()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "Profile: {}",
            session.map_or("-", |session| session.profile().name.as_str())
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "Session: {}",
            session.map_or("-", |session| session.state().label())
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "DB: {}",
            app.database().map_or("-", DatabaseController::name)
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("sqlnav"));
    frame.render_widget(header, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(28), Constraint::Percentage(72)])
        .split(chunks[1]);
    let lists = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(30),
            Constraint::Percentage(45),
        ])
        .split(body[0]);

    let connections: Vec<String> = app
        .sessions
        .iter()
        .map(|session| {
            format!(
                "{} ({})",
                session.profile().name,
                session.profile().engine
            )
        })
        .collect();
    render_list(frame, lists[0], app, Pane::Connections, &connections, app.connection_index);

    let databases = session.map_or_else(Vec::new, |session| session.databases().to_vec());
    render_list(frame, lists[1], app, Pane::Databases, &databases, app.database_cursor);

    let objects = match app.database() {
        Some(database) => match database.listing() {
            ListingState::Listing => vec!["listing...".to_string()],
            ListingState::Failed(error) => vec![error.to_string(), "r: retry".to_string()],
            ListingState::Idle | ListingState::Ready => database
                .entries()
                .iter()
                .map(|entry| match entry {
                    BrowserEntry::View(_) => format!("{} (view)", entry.name()),
                    _ => entry.name().to_string(),
                })
                .collect(),
        },
        None => Vec::new(),
    };
    render_list(frame, lists[2], app, Pane::Objects, &objects, app.object_cursor);

    let content_area = body[1];
    let visible = usize::from(content_area.height.saturating_sub(4)).max(1);
    let content_lines = content_lines(app, visible);
    let content = Paragraph::new(content_lines.into_iter().map(Line::from).collect::<Vec<_>>())
        .block(pane_block(app, Pane::Content));
    frame.render_widget(content, content_area);

    let footer = Paragraph::new(vec![
        Line::from(footer_hint(app)),
        Line::from(format!("Status: {}", app.status_text())),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(app.store.path().display().to_string()),
    );
    frame.render_widget(footer, chunks[2]);

    if let Some(form) = &app.form {
        render_form_popup(frame, form);
    }
    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_form_popup(frame: &mut Frame<'_>, form: &ProfileForm) {
    let area = centered_rect(60, 60, frame.area());
    frame.render_widget(Clear, area);
    let lines: Vec<Line<'_>> = form.lines().into_iter().map(Line::from).collect();
    let popup = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(form.title())
            .border_style(Style::default().fg(Color::Yellow)),
    );
    frame.render_widget(popup, area);
}

fn pane_block(app: &TuiApp, pane: Pane) -> Block<'static> {
    let block = Block::default().borders(Borders::ALL).title(pane.title());
    if app.pane == pane {
        block.border_style(Style::default().fg(Color::Yellow))
    } else {
        block
    }
}

fn render_list(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &TuiApp,
    pane: Pane,
    items: &[String],
    cursor: usize,
) {
    let lines: Vec<Line<'_>> = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let marker = if index == cursor { ">" } else { " " };
            Line::from(format!("{marker} {item}"))
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).block(pane_block(app, pane)), area);
}

fn content_lines(app: &TuiApp, visible: usize) -> Vec<String> {
    let Some(entry) = app.selected_entry() else {
        return vec!["Select an object with Enter.".to_string()];
    };

    match entry {
        BrowserEntry::AdHoc(editor) => editor_lines(editor, app.content_offset, visible),
        BrowserEntry::Table(object) | BrowserEntry::View(object) => {
            object_lines(object, app.content_view, app.content_offset, visible)
        }
    }
}

fn editor_lines(editor: &AdHocEditor, offset: usize, visible: usize) -> Vec<String> {
    let (before, after) = editor.text().split_at(editor.cursor());
    let mut lines: Vec<String> = format!("{before}|{after}")
        .lines()
        .map(str::to_string)
        .collect();
    lines.push(String::new());

    match editor.run_state() {
        AdHocRun::Idle => lines.push("Ctrl+E: run statement under cursor".to_string()),
        AdHocRun::Running { query, .. } => {
            lines.push(format!("> {query}"));
            lines.push(editor.status().unwrap_or_default());
        }
        AdHocRun::Finished { query, outcome } => {
            lines.push(format!("> {query}"));
            lines.extend(outcome_lines(outcome, offset, visible));
        }
        AdHocRun::Failed { query, error } => {
            lines.push(format!("> {query}"));
            lines.push(error.to_string());
        }
    }
    lines
}

fn object_lines(
    object: &ObjectController,
    view: ContentView,
    offset: usize,
    visible: usize,
) -> Vec<String> {
    match object.state() {
        ObjectState::Uninitialized => vec!["Press Enter on the object to load it.".to_string()],
        ObjectState::Loading => vec![object.status().unwrap_or("loading...").to_string()],
        ObjectState::Failed => vec![
            object
                .error()
                .map_or_else(|| "load failed".to_string(), ToString::to_string),
            "r: retry".to_string(),
        ],
        ObjectState::Loaded => match view {
            ContentView::Data => object
                .rows()
                .map(|outcome| outcome_lines(outcome, offset, visible))
                .unwrap_or_default(),
            ContentView::Structure => object
                .structure()
                .map(|structure| {
                    let mut lines: Vec<String> = structure
                        .columns
                        .iter()
                        .skip(offset)
                        .take(visible)
                        .map(|column| {
                            format!(
                                "{} {}{}{}",
                                column.name,
                                column.data_type,
                                if column.nullable { "" } else { " not null" },
                                column
                                    .default_value
                                    .as_deref()
                                    .map(|default| format!(" default {default}"))
                                    .unwrap_or_default()
                            )
                        })
                        .collect();
                    if let Some(definition) = &structure.definition {
                        lines.push(String::new());
                        lines.extend(definition.lines().map(str::to_string));
                    }
                    lines
                })
                .unwrap_or_default(),
        },
    }
}

fn outcome_lines(outcome: &QueryOutcome, offset: usize, visible: usize) -> Vec<String> {
    if outcome.is_empty() {
        return vec!["empty resultset".to_string()];
    }
    format_table(outcome.columns(), outcome.rows(), offset, visible)
}

/// Header plus a window of rows, padded per column. Numeric columns are
/// right-aligned.
fn format_table(
    columns: &[ColumnHeader],
    rows: &[Vec<Cell>],
    offset: usize,
    limit: usize,
) -> Vec<String> {
    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            rows.iter()
                .filter_map(|row| row.get(index))
                .map(|cell| cell.display().chars().count())
                .chain(std::iter::once(column.name.chars().count()))
                .max()
                .unwrap_or(0)
                .min(MAX_COLUMN_WIDTH)
        })
        .collect();

    let format_row = |values: Vec<(&str, Alignment)>| -> String {
        values
            .into_iter()
            .zip(&widths)
            .map(|((value, alignment), &width)| {
                let value: String = value.chars().take(width).collect();
                match alignment {
                    Alignment::Left => format!("{value:<width$}"),
                    Alignment::Right => format!("{value:>width$}"),
                }
            })
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(
        columns
            .iter()
            .map(|column| (column.name.as_str(), Alignment::Left))
            .collect(),
    )];
    lines.extend(rows.iter().skip(offset).take(limit).map(|row| {
        format_row(
            row.iter()
                .zip(columns)
                .map(|(cell, column)| (cell.display(), column.alignment))
                .collect(),
        )
    }));
    lines
}

fn footer_hint(app: &TuiApp) -> &'static str {
    if let Some(form) = &app.form {
        return match form.active_field() {
            FormField::Engine | FormField::PasswordSource | FormField::Tls => {
                "Left/Right/Space: change | Tab: next field | Enter: save | Esc: discard"
            }
            _ => "type to edit | Tab/Up/Down: move | Enter: save | Esc: discard",
        };
    }
    match app.pane {
        Pane::Connections => {
            "Enter: connect | n/e/c/x: new, edit, copy, delete | Ctrl+D: disconnect | ?: help"
        }
        Pane::Databases => "Enter: open database | Esc: cancel | r: retry | Tab: next pane",
        Pane::Objects => "Enter: open object | Esc: cancel | r: retry | Tab: next pane",
        Pane::Content if app.is_editing() => {
            "Ctrl+E: run | F5: rerun | Ctrl+S: save | Esc: cancel | Tab: next pane"
        }
        Pane::Content => "t: data/structure | arrows: scroll | Esc: cancel | r: retry",
    }
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Keys"),
        Line::from("q / Ctrl+Q: quit"),
        Line::from("?: toggle help"),
        Line::from("Tab / Shift+Tab: cycle panes"),
        Line::from("Enter: connect, open database, open object"),
        Line::from("Esc / Ctrl+C: cancel the running operation"),
        Line::from("r / Ctrl+R: retry after a failure"),
        Line::from("Ctrl+D: disconnect"),
        Line::from("t: toggle data and structure"),
        Line::from("Ctrl+E / F5 / Ctrl+S: run, rerun, save script"),
        Line::from("n / e / c: new, edit, duplicate connection"),
        Line::from("x twice: delete connection"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, editing: bool) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Esc) => Some(Msg::Cancel),
        (KeyModifiers::CONTROL, KeyCode::Char('d')) => Some(Msg::Disconnect),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(Msg::Retry),
        (KeyModifiers::CONTROL, KeyCode::Char('e')) => Some(Msg::RunStatement),
        (KeyModifiers::CONTROL, KeyCode::Char('s')) => Some(Msg::SaveScript),
        (_, KeyCode::F(5)) => Some(Msg::Rerun),
        (_, KeyCode::Tab) => Some(Msg::NextPane),
        (_, KeyCode::BackTab) => Some(Msg::PreviousPane),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Left) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Right) => Some(Msg::Navigate(DirectionKey::Right)),
        (_, KeyCode::Enter) if editing => Some(Msg::Input('\n')),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Backspace) if editing => Some(Msg::Backspace),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(c)) if editing => {
            Some(Msg::Input(c))
        }
        (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Char('r')) => Some(Msg::Retry),
        (_, KeyCode::Char('t')) => Some(Msg::ToggleView),
        (_, KeyCode::Char('n')) => Some(Msg::NewProfile),
        (_, KeyCode::Char('e')) => Some(Msg::EditProfile),
        (_, KeyCode::Char('c')) => Some(Msg::DuplicateProfile),
        (_, KeyCode::Char('x')) => Some(Msg::DeleteProfile),
        (_, KeyCode::Char('k')) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Char('j')) => Some(Msg::Navigate(DirectionKey::Down)),
        (_, KeyCode::Char('h')) => Some(Msg::Navigate(DirectionKey::Left)),
        (_, KeyCode::Char('l')) => Some(Msg::Navigate(DirectionKey::Right)),
        _ => None,
    }
}
