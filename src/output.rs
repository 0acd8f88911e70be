// src/output.rs

//! Accumulated subprocess output for the result report

use std::process::Output;

/// Append-only record of what the control script printed during one run
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    text: String,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, text: &str) {
        self.text.push_str(text);
        if !text.is_empty() && !text.ends_with('\n') {
            self.text.push('\n');
        }
    }

    /// Record stdout followed by stderr of a finished command
    pub fn append_output(&mut self, output: &Output) {
        self.append(&String::from_utf8_lossy(&output.stdout));
        self.append(&String::from_utf8_lossy(&output.stderr));
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}
