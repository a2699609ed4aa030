//! Popup form for creating and editing connection profiles.

use sqlnav_core::profiles::{EngineKind, PasswordSource, ProfileDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormField {
    Engine,
    Name,
    Host,
    Port,
    User,
    Password,
    PasswordSource,
    Database,
    Tls,
}

impl FormField {
    const ALL: [Self; 9] = [
        Self::Engine,
        Self::Name,
        Self::Host,
        Self::Port,
        Self::User,
        Self::Password,
        Self::PasswordSource,
        Self::Database,
        Self::Tls,
    ];

    fn next(self) -> Self {
        match self {
            Self::Engine => Self::Name,
            Self::Name => Self::Host,
            Self::Host => Self::Port,
            Self::Port => Self::User,
            Self::User => Self::Password,
            Self::Password => Self::PasswordSource,
            Self::PasswordSource => Self::Database,
            Self::Database => Self::Tls,
            Self::Tls => Self::Engine,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Engine => Self::Tls,
            Self::Name => Self::Engine,
            Self::Host => Self::Name,
            Self::Port => Self::Host,
            Self::User => Self::Port,
            Self::Password => Self::User,
            Self::PasswordSource => Self::Password,
            Self::Database => Self::PasswordSource,
            Self::Tls => Self::Database,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Engine => "Engine",
            Self::Name => "Name",
            Self::Host => "Host",
            Self::Port => "Port",
            Self::User => "User",
            Self::Password => "Password",
            Self::PasswordSource => "Password from",
            Self::Database => "Database",
            Self::Tls => "TLS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProfileForm {
    draft: ProfileDraft,
    active_field: FormField,
}

impl ProfileForm {
    pub(crate) fn new(draft: ProfileDraft) -> Self {
        let active_field = if draft.original.is_some() {
            FormField::Name
        } else {
            FormField::Engine
        };
        Self {
            draft,
            active_field,
        }
    }

    pub(crate) fn draft(&self) -> &ProfileDraft {
        &self.draft
    }

    pub(crate) fn active_field(&self) -> FormField {
        self.active_field
    }

    pub(crate) fn title(&self) -> &'static str {
        if self.draft.original.is_some() {
            "Edit connection"
        } else {
            "New connection"
        }
    }

    pub(crate) fn next_field(&mut self) {
        self.active_field = self.active_field.next();
    }

    pub(crate) fn previous_field(&mut self) {
        self.active_field = self.active_field.previous();
    }

    /// Steps the engine, password source or TLS choice. Text fields ignore it.
    pub(crate) fn cycle(&mut self, forward: bool) {
        match self.active_field {
            FormField::Engine => {
                self.draft.engine = cycle_choice(&EngineKind::ALL, self.draft.engine, forward);
            }
            FormField::PasswordSource => {
                self.draft.password_source =
                    cycle_choice(&PasswordSource::ALL, self.draft.password_source, forward);
            }
            FormField::Tls => self.draft.tls = !self.draft.tls,
            _ => {}
        }
    }

    pub(crate) fn insert_char(&mut self, c: char) {
        if c == ' ' && self.text_mut().is_none() {
            self.cycle(true);
            return;
        }
        if c.is_control() {
            return;
        }
        if let Some(text) = self.text_mut() {
            text.push(c);
        }
    }

    pub(crate) fn backspace(&mut self) {
        if let Some(text) = self.text_mut() {
            text.pop();
        }
    }

    fn text_mut(&mut self) -> Option<&mut String> {
        match self.active_field {
            FormField::Name => Some(&mut self.draft.name),
            FormField::Host => Some(&mut self.draft.host),
            FormField::Port => Some(&mut self.draft.port),
            FormField::User => Some(&mut self.draft.user),
            FormField::Password => Some(&mut self.draft.password),
            FormField::Database => Some(&mut self.draft.database),
            FormField::Engine | FormField::PasswordSource | FormField::Tls => None,
        }
    }

    fn value(&self, field: FormField) -> String {
        match field {
            FormField::Engine => self.draft.engine.to_string(),
            FormField::Name => self.draft.name.clone(),
            FormField::Host => self.draft.host.clone(),
            FormField::Port if self.draft.port.is_empty() => {
                format!("(default {})", self.draft.engine.default_port())
            }
            FormField::Port => self.draft.port.clone(),
            FormField::User => self.draft.user.clone(),
            FormField::Password => "*".repeat(self.draft.password.chars().count()),
            FormField::PasswordSource => self.draft.password_source.as_str().to_string(),
            FormField::Database => self.draft.database.clone(),
            FormField::Tls => String::from(if self.draft.tls { "on" } else { "off" }),
        }
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        FormField::ALL
            .into_iter()
            .map(|field| {
                let marker = if field == self.active_field { ">" } else { " " };
                format!("{marker} {}: {}", field.label(), self.value(field))
            })
            .collect()
    }
}

fn cycle_choice<T: Copy + PartialEq>(choices: &[T], current: T, forward: bool) -> T {
    let len = choices.len();
    let index = choices
        .iter()
        .position(|choice| *choice == current)
        .unwrap_or(0);
    let next = if forward {
        (index + 1) % len
    } else {
        (index + len - 1) % len
    };
    choices[next]
}
