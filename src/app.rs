use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::state::SelectionEngine;
use crate::ui::panels;

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(PathBuf),
    Close,
    Properties { json: bool },
    Help,
    /// An empty expression clears the filter.
    Filter(String),
    Clear,
    Goto(usize),
    Next,
    Prev,
    Show,
    Filtering(bool),
    Status,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command `{0}`, type `help` for a list")]
    Unknown(String),

    #[error("`{command}` needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("`{command}`: invalid argument `{arg}`")]
    BadArgument { command: &'static str, arg: String },
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "open" if rest.is_empty() => {
                return Err(CommandError::MissingArgument {
                    command: "open",
                    what: "a file path",
                })
            }
            "open" => Command::Open(PathBuf::from(rest)),
            "close" => Command::Close,
            "props" | "properties" => match rest {
                "" => Command::Properties { json: false },
                "json" => Command::Properties { json: true },
                other => {
                    return Err(CommandError::BadArgument {
                        command: "props",
                        arg: other.to_string(),
                    })
                }
            },
            "help" | "?" => Command::Help,
            "filter" => Command::Filter(rest.to_string()),
            "clear" => Command::Clear,
            "goto" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument {
                        command: "goto",
                        what: "a spike number",
                    });
                }
                let n = rest.parse().map_err(|_| CommandError::BadArgument {
                    command: "goto",
                    arg: rest.to_string(),
                })?;
                Command::Goto(n)
            }
            "next" | "n" => Command::Next,
            "prev" | "p" => Command::Prev,
            "show" => Command::Show,
            "filtering" => match rest {
                "on" => Command::Filtering(true),
                "off" => Command::Filtering(false),
                "" => {
                    return Err(CommandError::MissingArgument {
                        command: "filtering",
                        what: "`on` or `off`",
                    })
                }
                other => {
                    return Err(CommandError::BadArgument {
                        command: "filtering",
                        arg: other.to_string(),
                    })
                }
            },
            "status" => Command::Status,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

// ---------------------------------------------------------------------------
// Console app
// ---------------------------------------------------------------------------

/// Line-oriented front end over a [`SelectionEngine`].
#[derive(Debug, Default)]
pub struct ConsoleApp {
    pub engine: SelectionEngine,
}

impl ConsoleApp {
    pub fn new(engine: SelectionEngine) -> Self {
        Self { engine }
    }

    /// Read commands until `quit` or end of input.
    ///
    /// Command failures are reported on `out`; only I/O errors end the loop
    /// early.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut out: W) -> Result<()> {
        for line in input.lines() {
            let line = line.context("reading command")?;
            match Command::parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command, &mut out)?,
                Err(e) => writeln!(out, "Error: {e}")?,
            }
            out.flush()?;
        }
        Ok(())
    }

    /// Run one command, writing its result (or error) to `out`.
    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> Result<()> {
        match command {
            Command::Open(path) => match self.engine.open(&path) {
                Ok(md) => {
                    writeln!(out, "Opened {} ({} spikes)", md.filename, md.numspikes)?;
                    self.show(out)?;
                }
                Err(e) => writeln!(out, "Error: {e}")?,
            },
            Command::Close => {
                self.engine.close();
                writeln!(out, "Closed")?;
            }
            Command::Properties { json } => match self.engine.metadata() {
                Some(md) if json => writeln!(out, "{}", panels::properties_json(md)?)?,
                Some(md) => writeln!(out, "{}", panels::properties(md))?,
                None => writeln!(out, "No spike table open")?,
            },
            Command::Help => writeln!(out, "{}", panels::HELP_TEXT)?,
            Command::Filter(expression) => self.filter(&expression, out)?,
            Command::Clear => self.filter("", out)?,
            Command::Goto(position) => match self.engine.step_to(position) {
                Ok(()) => self.show(out)?,
                Err(e) => writeln!(out, "Error: {e}")?,
            },
            Command::Next => match self.engine.step_forward() {
                Ok(true) => self.show(out)?,
                Ok(false) => writeln!(out, "Already at the last spike")?,
                Err(e) => writeln!(out, "Error: {e}")?,
            },
            Command::Prev => match self.engine.step_back() {
                Ok(true) => self.show(out)?,
                Ok(false) => writeln!(out, "Already at the first spike")?,
                Err(e) => writeln!(out, "Error: {e}")?,
            },
            Command::Show => self.show(out)?,
            Command::Filtering(on) => {
                self.engine.set_waveform_filtering(on);
                self.show(out)?;
            }
            Command::Status => writeln!(out, "{}", panels::status_bar(&self.engine))?,
            Command::Quit => {}
        }
        Ok(())
    }

    fn filter<W: Write>(&mut self, expression: &str, out: &mut W) -> Result<()> {
        match self.engine.apply_filter(expression) {
            Ok(_) => {
                writeln!(out, "{}", panels::status_bar(&self.engine))?;
                self.show(out)
            }
            Err(e) => {
                writeln!(out, "Bad filter, error:\n  {e}")?;
                Ok(())
            }
        }
    }

    fn show<W: Write>(&self, out: &mut W) -> Result<()> {
        match panels::spike_panel(&self.engine) {
            Ok(text) => write!(out, "{text}")?,
            Err(e) => writeln!(out, "{e}")?,
        }
        Ok(())
    }
}
