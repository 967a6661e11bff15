//! Parsing for the interactive console.

use std::path::PathBuf;
use std::time::Duration;

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Status { json: bool },
    List,
    Play,
    Pause,
    Skip { index: usize, offset: Duration },
    Add(Vec<PathBuf>),
    Set(Vec<PathBuf>),
    Remove(usize),
    Clear,
    /// `None` shows the current gain
    Gain(Option<f32>),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  status [--json]      show what is playing
  list                 show the playlist
  play | pause         resume / pause
  skip <n> [secs]      jump to item n (1-based), optionally into it
  add <paths>          append files or directories
  set <paths>          replace the playlist
  remove <n>           remove item n (1-based)
  clear                stop and empty the playlist
  gain [0.0-1.0]       show or set gain
  quit                 stop and exit";

impl ConsoleCommand {
    /// Parse a console line. Empty lines yield `Ok(None)`.
    ///
    /// Item numbers are 1-based, as shown by `list`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words = split_words(line)?;
        let Some((head, rest)) = words.split_first() else {
            return Ok(None);
        };

        let command = match head.to_lowercase().as_str() {
            "status" | "s" => Self::Status {
                json: rest.iter().any(|w| w == "--json"),
            },
            "list" | "ls" => Self::List,
            "play" => Self::Play,
            "pause" => Self::Pause,
            "skip" => {
                let index = item_number(rest.first())?;
                let offset = match rest.get(1) {
                    Some(secs) => {
                        let secs: f64 = secs.parse().map_err(|_| format!("bad offset: {}", secs))?;
                        Duration::try_from_secs_f64(secs).map_err(|_| format!("bad offset: {}", secs))?
                    }
                    None => Duration::ZERO,
                };
                Self::Skip { index, offset }
            }
            "add" | "set" => {
                if rest.is_empty() {
                    return Err(format!("usage: {} <paths>", head));
                }
                let paths = rest.iter().map(PathBuf::from).collect();
                if head.eq_ignore_ascii_case("add") {
                    Self::Add(paths)
                } else {
                    Self::Set(paths)
                }
            }
            "remove" | "rm" => Self::Remove(item_number(rest.first())?),
            "clear" => Self::Clear,
            "gain" | "vol" => match rest.first() {
                Some(v) => Self::Gain(Some(v.parse().map_err(|_| format!("bad gain: {}", v))?)),
                None => Self::Gain(None),
            },
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown command: {} (try help)", other)),
        };
        Ok(Some(command))
    }
}

/// 1-based item number → 0-based index.
fn item_number(word: Option<&String>) -> Result<usize, String> {
    let word = word.ok_or_else(|| "missing item number".to_string())?;
    match word.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(format!("bad item number: {}", word)),
    }
}

/// Split on whitespace, keeping "double quoted" runs together.
fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_word = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if has_word {
        words.push(current);
    }
    Ok(words)
}
