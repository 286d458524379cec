//! Line editing for the debugger prompt: completion, hints and colors, all
//! driven by the clap definition of the interactive commands.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::iter::once;
use std::marker::PhantomData;

use anstyle::{AnsiColor, Color, Style};
use clap::{Arg, Command, CommandFactory};
use rivet_emulator::runtime::{Csr, Reg};
use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::Context;
use rustyline_derive::Helper;

const PROMPT: Style = Style::new().bold();
const HINT: Style = Style::new().dimmed();
const COMMAND: Style = Style::new().bold();
const UNKNOWN: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
const NUMBER: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
const REGISTER: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow)));

#[derive(Helper, Debug)]
pub(crate) struct RunHelper<T: CommandFactory> {
    commands: PhantomData<T>,
}

impl<T: CommandFactory> RunHelper<T> {
    pub fn new() -> Self {
        RunHelper {
            commands: PhantomData,
        }
    }
}

/// What can be typed at the cursor
#[derive(Debug, Default, PartialEq, Eq)]
struct Suggestions {
    /// Length of the word under the cursor, replaced by a candidate
    word: usize,

    /// Sorted words starting with the one under the cursor
    candidates: Vec<String>,

    /// Positional arguments still expected, like `<address> [number]`
    usage: Vec<String>,
}

/// Split the line like the parser does. A trailing blank starts a new, empty
/// word.
fn words(line: &str) -> Option<Vec<String>> {
    let mut words = shell_words::split(line).ok()?;
    if line.is_empty() || line.ends_with(char::is_whitespace) {
        words.push(String::new());
    }
    Some(words)
}

/// Find a subcommand by name, alias or unambiguous prefix
fn subcommand<'a>(command: &'a Command, word: &str) -> Option<&'a Command> {
    if word.is_empty() {
        return None;
    }
    if let Some(sub) = command.find_subcommand(word) {
        return Some(sub);
    }

    let mut matching = command
        .get_subcommands()
        .filter(|sub| sub.get_name().starts_with(word));
    match (matching.next(), matching.next()) {
        (Some(sub), None) => Some(sub),
        _ => None,
    }
}

fn registers() -> impl Iterator<Item = String> {
    Reg::ALL.iter().map(ToString::to_string)
}

/// Known values for a positional argument
fn values(arg: &Arg) -> Vec<String> {
    match arg.get_id().as_str() {
        "register" => registers().collect(),
        "csr" => Csr::named().map(|csr| csr.to_string()).collect(),
        "address" | "target" | "value" => registers().chain(once("pc".to_owned())).collect(),
        _ => Vec::new(),
    }
}

fn placeholder(arg: &Arg) -> String {
    let name = arg.get_id().as_str();
    if arg.is_required_set() {
        format!("<{name}>")
    } else {
        format!("[{name}]")
    }
}

fn is_flag(word: &str) -> bool {
    word.starts_with('-') && word.parse::<i64>().is_err()
}

fn suggest(root: &Command, words: &[String]) -> Suggestions {
    let (word, typed) = match words.split_last() {
        Some((word, typed)) => (word.as_str(), typed),
        None => ("", words),
    };

    // Walk down the subcommands typed so far
    let mut command = root;
    let mut rest = typed;
    while let Some((head, tail)) = rest.split_first() {
        let Some(sub) = subcommand(command, head) else {
            break;
        };
        command = sub;
        rest = tail;
    }

    let mut pool = BTreeSet::new();
    if rest.is_empty() && command.has_subcommands() {
        pool.extend(
            command
                .get_subcommands()
                .flat_map(|sub| once(sub.get_name()).chain(sub.get_visible_aliases()))
                .map(str::to_owned),
        );
        pool.insert("help".to_owned());
    }

    if is_flag(word) {
        pool.extend(
            command
                .get_arguments()
                .filter_map(Arg::get_long)
                .map(|long| format!("--{long}")),
        );
    }

    let given = rest.iter().filter(|word| !is_flag(word)).count();
    let expected: Vec<&Arg> = command.get_positionals().skip(given).collect();
    if let Some(arg) = expected.first() {
        pool.extend(values(arg));
    }

    Suggestions {
        word: word.len(),
        candidates: pool
            .into_iter()
            .filter(|candidate| candidate.starts_with(word))
            .collect(),
        usage: expected.into_iter().map(placeholder).collect(),
    }
}

fn is_number(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    match digits.strip_prefix("0x") {
        Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()),
    }
}

/// Color a line: the command first, then numbers and register names in its
/// arguments. The text sent to the console is left alone.
fn paint(root: &Command, line: &str) -> String {
    let mut painted = String::with_capacity(line.len());
    let mut command = None;

    for piece in line.split_inclusive(char::is_whitespace) {
        let word = piece.trim_end();
        let style = if word.is_empty() {
            Style::new()
        } else if command.is_none() {
            let found = subcommand(root, word);
            command = Some(found);
            if found.is_some() || word == "help" {
                COMMAND
            } else {
                UNKNOWN
            }
        } else if command.flatten().is_some_and(|c| c.get_name() == "input") {
            Style::new()
        } else {
            let bare = word.trim_matches(['[', ']']);
            let is_csr = command.flatten().is_some_and(|c| c.get_name() == "csr")
                && bare.parse::<Csr>().is_ok();
            if is_number(bare) {
                NUMBER
            } else if bare == "pc" || bare.parse::<Reg>().is_ok() || is_csr {
                REGISTER
            } else {
                Style::new()
            }
        };

        painted.push_str(&format!(
            "{}{word}{}{}",
            style.render(),
            style.render_reset(),
            &piece[word.len()..]
        ));
    }

    painted
}

impl<T: CommandFactory> Completer for RunHelper<T> {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        let Some(words) = words(&line[..pos]) else {
            return Ok((pos, Vec::new()));
        };

        let suggestions = suggest(&T::command(), &words);
        Ok((pos.saturating_sub(suggestions.word), suggestions.candidates))
    }
}

impl<T: CommandFactory> Hinter for RunHelper<T> {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        if pos < line.len() {
            return None;
        }

        let suggestions = suggest(&T::command(), &words(line)?);
        match suggestions.candidates.as_slice() {
            [candidate] if candidate.len() > suggestions.word => {
                candidate.get(suggestions.word..).map(ToOwned::to_owned)
            }
            _ if suggestions.word == 0 && !suggestions.usage.is_empty() => {
                Some(suggestions.usage.join(" "))
            }
            _ => None,
        }
    }
}

impl<T: CommandFactory> Highlighter for RunHelper<T> {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned(paint(&T::command(), line))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("{}{hint}{}", HINT.render(), HINT.render_reset()))
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        Cow::Owned(format!("{}{prompt}{}", PROMPT.render(), PROMPT.render_reset()))
    }
}

impl<T: CommandFactory> Validator for RunHelper<T> {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        // An unclosed quote continues on the next line
        Ok(match shell_words::split(ctx.input()) {
            Ok(_) => ValidationResult::Valid(None),
            Err(_) => ValidationResult::Incomplete,
        })
    }
}
