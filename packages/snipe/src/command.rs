//! In-band command grammar and the display model the browser runs.
//!
//! Payloads carry no envelope: a text frame whose trimmed, lowercased body
//! equals one of the command tokens is an instruction, anything else is
//! display text. [`Display`] mirrors the page script exactly and is what the
//! tests check wire behaviour against.

pub const CLEAR_TOKEN: &str = "#cmd clear";
pub const DUMP_TOKEN: &str = "#cmd dump";
pub const REDRUM_TOKEN: &str = "#cmd redrum";

/// Marker rendered in place of content while in alert mode.
pub const ALERT_MARKER: &str = "REDRUM";

pub const LINE_BREAK: &str = "<br/>";

/// Help banner the page starts with and `#cmd clear` restores.
pub const DEFAULT_CONTENT: &str = "<strong>commands</strong><br/><em>#cmd clear</em><br/><em>#cmd dump</em><br/><em>#cmd redrum</em><br/><br/>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Clear,
    Dump,
    Redrum,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Clear, Command::Dump, Command::Redrum];

    /// Case-insensitive, whitespace-trimmed exact match.
    pub fn parse(payload: &str) -> Option<Self> {
        let normalized = payload.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.token() == normalized)
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Clear => CLEAR_TOKEN,
            Self::Dump => DUMP_TOKEN,
            Self::Redrum => REDRUM_TOKEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Normal,
    Alert,
}

/// What applying one payload did to the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Empty payloads are dropped before any matching.
    Ignored,
    Cleared,
    /// The client logged its rendered document.
    Dumped,
    /// `first` is true when this payload switched the display into alert mode.
    Alert { first: bool },
    Appended,
}

/// Client-side display state: rendered buffer plus mode.
#[derive(Debug, Clone)]
pub struct Display {
    initial: String,
    buffer: String,
    mode: DisplayMode,
}

impl Display {
    pub fn new(initial: impl Into<String>) -> Self {
        let initial = initial.into();
        Self {
            buffer: initial.clone(),
            initial,
            mode: DisplayMode::Normal,
        }
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Apply one received payload. Precedence follows the page script:
    /// clear, then redrum or an active alert, then dump, then text.
    pub fn apply(&mut self, payload: &str) -> Effect {
        if payload.is_empty() {
            return Effect::Ignored;
        }

        let command = Command::parse(payload);

        if command == Some(Command::Clear) {
            self.buffer = self.initial.clone();
            self.mode = DisplayMode::Normal;
            return Effect::Cleared;
        }

        if command == Some(Command::Redrum) || self.mode == DisplayMode::Alert {
            let first = self.mode != DisplayMode::Alert;
            if first {
                self.mode = DisplayMode::Alert;
                self.buffer = ALERT_MARKER.to_string();
            } else {
                self.buffer.push(' ');
                self.buffer.push_str(ALERT_MARKER);
            }
            return Effect::Alert { first };
        }

        if command == Some(Command::Dump) {
            self.mode = DisplayMode::Normal;
            return Effect::Dumped;
        }

        self.buffer.push_str(payload);
        self.buffer.push_str(LINE_BREAK);
        Effect::Appended
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT)
    }
}
