//! Client typing surface
//!
//! Keystroke bookkeeping shared by clients: which prefix of the reference
//! text has been typed correctly, where the pending errors are, and what the
//! resulting progress report looks like. Errors block further input until
//! they are backspaced away, so accuracy is always reported as 100.

use std::collections::BTreeSet;

/// Seconds shown by the local countdown overlay
pub const COUNTDOWN_SECONDS: u64 = 3;

/// Standard word length used for WPM
const CHARS_PER_WORD: f64 = 5.0;

/// Gross words per minute (no error penalty)
pub fn gross_wpm(chars: usize, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    (chars as f64 / CHARS_PER_WORD) / (seconds / 60.0)
}

/// Text shown by the countdown overlay `elapsed_ms` after the countdown began.
///
/// Purely cosmetic: the server decides when the race actually goes live.
pub fn countdown_display(elapsed_ms: u64) -> String {
    let elapsed_secs = elapsed_ms / 1000;
    if elapsed_secs >= COUNTDOWN_SECONDS {
        "GO!".to_string()
    } else {
        (COUNTDOWN_SECONDS - elapsed_secs).to_string()
    }
}

/// What a client sends to the progress tracker
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub progress: f64,
    pub wpm: f64,
    pub accuracy: f64,
    pub is_finished: bool,
}

#[derive(Debug, Clone)]
pub struct TypingSession {
    text: Vec<char>,
    input: Vec<char>,
    errors: BTreeSet<usize>,
    completed: usize,
    finished: bool,
}

impl TypingSession {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.chars().collect(),
            input: Vec::new(),
            errors: BTreeSet::new(),
            completed: 0,
            finished: false,
        }
    }

    /// Resume from a stored progress percentage (e.g. after a reload)
    pub fn restore(text: &str, progress: f64, finished: bool) -> Self {
        let mut session = Self::new(text);
        let len = session.text.len();
        let chars = ((progress.clamp(0.0, 100.0) / 100.0) * len as f64).floor() as usize;
        session.input = session.text[..chars.min(len)].to_vec();
        session.completed = session.input.len();
        session.finished = finished || (len > 0 && session.completed == len);
        session
    }

    /// Type a single character. Returns false if the keystroke was blocked.
    pub fn type_char(&mut self, ch: char) -> bool {
        if self.finished || !self.errors.is_empty() || self.input.len() >= self.text.len() {
            return false;
        }

        let position = self.input.len();
        self.input.push(ch);

        if ch == self.text[position] {
            if position == self.completed {
                self.completed = position + 1;
            }
            if position == self.text.len() - 1 {
                self.finished = true;
            }
        } else {
            self.errors.insert(position);
        }
        true
    }

    /// Remove the last typed character
    pub fn backspace(&mut self) {
        if self.finished {
            return;
        }
        if self.input.pop().is_some() {
            let position = self.input.len();
            self.errors.remove(&position);
            if position < self.completed {
                self.completed = position;
            }
        }
    }

    /// Apply a whole new input value (as delivered by a text field change)
    pub fn set_input(&mut self, value: &str) {
        let new: Vec<char> = value.chars().collect();
        while self.input.len() > new.len() || !new.starts_with(&self.input) {
            if self.input.is_empty() {
                break;
            }
            self.backspace();
            if self.finished {
                return;
            }
        }
        for &ch in &new[self.input.len().min(new.len())..] {
            if !self.type_char(ch) {
                break;
            }
        }
    }

    pub fn text(&self) -> String {
        self.text.iter().collect()
    }

    pub fn input(&self) -> String {
        self.input.iter().collect()
    }

    pub fn completed_chars(&self) -> usize {
        self.completed
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Longest correctly typed prefix as a percentage of the text
    pub fn progress(&self) -> f64 {
        if self.text.is_empty() {
            return 0.0;
        }
        self.completed as f64 / self.text.len() as f64 * 100.0
    }

    /// Rounded WPM over `elapsed_secs` seconds since the race started
    pub fn wpm(&self, elapsed_secs: f64) -> f64 {
        gross_wpm(self.completed, elapsed_secs).round()
    }

    pub fn report(&self, elapsed_secs: f64) -> ProgressReport {
        ProgressReport {
            progress: self.progress(),
            wpm: self.wpm(elapsed_secs),
            accuracy: 100.0,
            is_finished: self.finished,
        }
    }
}
