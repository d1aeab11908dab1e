//! Front-end abstraction.
//!
//! All user-facing surfaces drive the same orchestration in
//! [`crate::session`] through the [`FrontEnd`] trait. A surface only has to
//! say how it reads text and how it shows text, progress, and warnings.
//!
//! - [`ConsoleFrontEnd`] — line-oriented terminal I/O.
//! - [`ScriptedFrontEnd`] — answers prompts from a fixed queue and buffers
//!   output. Used by the web form, the chat API's ingestion log, and tests.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

#[async_trait]
pub trait FrontEnd: Send {
    /// Ask for one line of text. `None` means no more input is available.
    async fn prompt_text(&mut self, label: &str) -> Result<Option<String>>;

    fn display_text(&mut self, text: &str);

    fn display_progress(&mut self, text: &str);

    fn display_warning(&mut self, text: &str) {
        self.display_text(text);
    }
}

// ============ Console ============

pub struct ConsoleFrontEnd<R, W> {
    input: R,
    output: W,
}

impl ConsoleFrontEnd<BufReader<Stdin>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), std::io::stdout())
    }
}

impl<R, W> ConsoleFrontEnd<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn write_line(&mut self, text: &str) {
        // Console output is best-effort; a closed stdout ends the session via EOF on input.
        let _ = writeln!(self.output, "{}", text);
        let _ = self.output.flush();
    }
}

#[async_trait]
impl<R, W> FrontEnd for ConsoleFrontEnd<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn prompt_text(&mut self, label: &str) -> Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).await?;
        if read == 0 {
            // EOF: move off the prompt line
            writeln!(self.output)?;
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    fn display_text(&mut self, text: &str) {
        self.write_line(text);
    }

    fn display_progress(&mut self, text: &str) {
        self.write_line(text);
    }
}

// ============ Scripted ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Text,
    Progress,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub text: String,
}

/// Front end fed from a queue of prepared inputs, recording all output.
#[derive(Debug, Default)]
pub struct ScriptedFrontEnd {
    inputs: VecDeque<String>,
    prompts: Vec<String>,
    output: Vec<OutputLine>,
}

impl ScriptedFrontEnd {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Labels of every prompt shown, in order.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn output(&self) -> &[OutputLine] {
        &self.output
    }

    pub fn into_output(self) -> Vec<OutputLine> {
        self.output
    }

    /// True when some output line of any kind contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.output.iter().any(|l| l.text.contains(needle))
    }

    fn push(&mut self, kind: OutputKind, text: &str) {
        self.output.push(OutputLine {
            kind,
            text: text.to_string(),
        });
    }
}

#[async_trait]
impl FrontEnd for ScriptedFrontEnd {
    async fn prompt_text(&mut self, label: &str) -> Result<Option<String>> {
        self.prompts.push(label.to_string());
        Ok(self.inputs.pop_front())
    }

    fn display_text(&mut self, text: &str) {
        self.push(OutputKind::Text, text);
    }

    fn display_progress(&mut self, text: &str) {
        self.push(OutputKind::Progress, text);
    }

    fn display_warning(&mut self, text: &str) {
        self.push(OutputKind::Warning, text);
    }
}
