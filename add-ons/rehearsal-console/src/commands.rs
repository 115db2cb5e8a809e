//! Console input parsing. Anything that is not a slash command is speech.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    /// The "meet the stakeholder" button.
    Meet,
    /// The "end session" button.
    End,
    /// Transcribe a WAV recording and send it as the trainee's turn.
    Voice(PathBuf),
    Save(Option<PathBuf>),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name.to_ascii_lowercase().as_str() {
        "meet" => Command::Meet,
        "end" => Command::End,
        "voice" if !arg.is_empty() => Command::Voice(PathBuf::from(arg)),
        "save" | "download" => Command::Save((!arg.is_empty()).then(|| PathBuf::from(arg))),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

pub const HELP: &str = "\
Commands:
  /meet            meet the stakeholder (when offered)
  /end             end the conversation and get feedback
  /voice <file>    send a WAV recording as your turn
  /save [path]     download the transcript (debrief only)
  /quit            leave the session
Anything else is said to the active persona.";
