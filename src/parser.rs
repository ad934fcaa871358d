//! Turns one input line into a [`PipelineList`].
//!
//! The parser is pure: it never touches the filesystem or a process table,
//! it only ever returns a tree or a single-line diagnostic string. Callers
//! are responsible for printing that diagnostic with the `jsh: ` prefix and
//! for feeding the tree to the executor.

use std::fmt;

/// Hard cap on tokens accepted for a single command. Excess tokens are
/// silently dropped rather than rejected.
const MAX_TOKENS: usize = 256;

/// Which standard stream a redirection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
}

/// How a redirection opens its target file. `None` is only ever paired with
/// `Channel::Stdin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirMode {
    None,
    Overwrite,
    Append,
    NoOverwrite,
}

/// What a redirection connects a channel to.
#[derive(Debug, Clone)]
pub enum RedirectTarget {
    /// A plain filename.
    File(String),
    /// A process-substitution pipeline (`<(...)`) used as the redirection
    /// target, e.g. `sort < <(cat a b)`. Only ever paired with `Channel::Stdin`.
    Substitution(Pipeline),
}

#[derive(Debug, Clone)]
pub struct Redirection {
    pub channel: Channel,
    pub mode: RedirMode,
    pub target: RedirectTarget,
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.channel, self.mode) {
            (Channel::Stdin, RedirMode::None) => "<",
            (Channel::Stdout, RedirMode::NoOverwrite) => ">",
            (Channel::Stdout, RedirMode::Overwrite) => ">|",
            (Channel::Stdout, RedirMode::Append) => ">>",
            (Channel::Stderr, RedirMode::NoOverwrite) => "2>",
            (Channel::Stderr, RedirMode::Overwrite) => "2>|",
            (Channel::Stderr, RedirMode::Append) => "2>>",
            _ => unreachable!("no other channel/mode pairing is ever constructed"),
        };
        match &self.target {
            RedirectTarget::File(name) => write!(f, " {op} {name}"),
            RedirectTarget::Substitution(p) => write!(f, " {op} <({p})"),
        }
    }
}

/// A single argument: either a literal word or an owned substitution
/// pipeline whose stdout becomes a `/proc/self/fd/<n>` path at execution
/// time.
#[derive(Debug, Clone)]
pub enum Argument {
    Literal(String),
    Substitution(Box<Pipeline>),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Literal(s) => write!(f, "{s}"),
            Argument::Substitution(p) => write!(f, "<({p})"),
        }
    }
}

/// A single command: a program name (or none, for the no-op placeholder),
/// its arguments, and its redirections in source order.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: Option<String>,
    pub argv: Vec<Argument>,
    pub redirections: Vec<Redirection>,
}

impl Command {
    /// The no-op placeholder: "preserve last exit status".
    pub fn empty() -> Self {
        Command {
            name: None,
            argv: Vec::new(),
            redirections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.argv.iter();
        if let Some(first) = parts.next() {
            write!(f, "{first}")?;
            for arg in parts {
                write!(f, " {arg}")?;
            }
        }
        for redir in &self.redirections {
            write!(f, "{redir}")?;
        }
        Ok(())
    }
}

/// A left-to-right chain of commands, stdout piped into the next stdin.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub to_job: bool,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = self.commands.iter();
        if let Some(first) = parts.next() {
            write!(f, "{first}")?;
            for cmd in parts {
                write!(f, " | {cmd}")?;
            }
        }
        Ok(())
    }
}

/// An ordered sequence of pipelines, separated by `&` in the input.
#[derive(Debug, Clone, Default)]
pub struct PipelineList {
    pub pipelines: Vec<Pipeline>,
}

impl PipelineList {
    /// Parse one input line. Returns a single-line diagnostic (no `jsh: `
    /// prefix attached yet) on syntax error.
    pub fn parse(input: &str) -> Result<PipelineList, String> {
        if input.is_empty() {
            return Ok(PipelineList {
                pipelines: Vec::new(),
            });
        }

        let mut segments = split_top_level(input, '&');
        let ends_with_amp = segments.len() > 1 && segments.last().unwrap().trim().is_empty();
        if ends_with_amp {
            segments.pop();
        }

        let mut pipelines = Vec::with_capacity(segments.len());
        let last_index = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            let to_job = if i == last_index {
                ends_with_amp
            } else {
                true
            };
            pipelines.push(parse_pipeline_text(segment, to_job)?);
        }

        Ok(PipelineList { pipelines })
    }
}

/// A single low-level token: either a plain whitespace-delimited word, or
/// the raw (unparsed) inner text of a `<(...)` substitution.
enum RawToken {
    Word(String),
    Substitution(String),
}

/// Scans `text` into [`RawToken`]s. Splits on runs of ASCII space; a `<(`
/// that starts a token is matched against its closing `)` (tracking nested
/// parens) and captured whole, so pipes/ampersands/spaces inside a
/// substitution never get mistaken for top-level syntax.
fn tokenize_raw(text: &str) -> Result<Vec<RawToken>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
            continue;
        }

        if chars[i] == '<' && chars.get(i + 1) == Some(&'(') {
            let start = i + 2;
            let mut depth = 1usize;
            let mut j = start;
            while j < chars.len() {
                match chars[j] {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                j += 1;
            }
            if depth != 0 {
                return Err("jsh: parse error: unterminated '<('".to_string());
            }
            let inner: String = chars[start..j].iter().collect();
            tokens.push(RawToken::Substitution(inner));
            i = j + 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i] != ' ' {
            i += 1;
        }
        tokens.push(RawToken::Word(chars[start..i].iter().collect()));
    }

    Ok(tokens)
}

/// Splits `text` on bare occurrences of `delim`, skipping over any `<(...)`
/// span so a delimiter character inside a substitution is never treated as
/// a top-level separator.
fn split_top_level(text: &str, delim: char) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut i = 0;

    while i < chars.len() {
        if depth == 0 && chars[i] == delim {
            segments.push(std::mem::take(&mut current));
            i += 1;
            continue;
        }
        if chars[i] == '<' && chars.get(i + 1) == Some(&'(') {
            depth += 1;
            current.push('<');
            current.push('(');
            i += 2;
            continue;
        }
        if chars[i] == ')' && depth > 0 {
            depth -= 1;
        }
        current.push(chars[i]);
        i += 1;
    }
    segments.push(current);
    segments
}

fn is_redir_op(word: &str) -> bool {
    matches!(word, "<" | ">" | ">|" | ">>" | "2>" | "2>|" | "2>>")
}

fn redir_kind(word: &str) -> (Channel, RedirMode) {
    match word {
        "<" => (Channel::Stdin, RedirMode::None),
        ">" => (Channel::Stdout, RedirMode::NoOverwrite),
        ">|" => (Channel::Stdout, RedirMode::Overwrite),
        ">>" => (Channel::Stdout, RedirMode::Append),
        "2>" => (Channel::Stderr, RedirMode::NoOverwrite),
        "2>|" => (Channel::Stderr, RedirMode::Overwrite),
        "2>>" => (Channel::Stderr, RedirMode::Append),
        _ => unreachable!("caller already checked is_redir_op"),
    }
}

/// Parses the text of a single pipeline segment (already isolated from its
/// neighbors by the top-level `&` split).
fn parse_pipeline_text(text: &str, to_job: bool) -> Result<Pipeline, String> {
    let tokens = tokenize_raw(text)?;

    if tokens.is_empty() {
        if to_job {
            return Err("jsh: parse error near '&'".to_string());
        }
        return Ok(Pipeline {
            commands: vec![Command::empty()],
            to_job,
        });
    }

    let starts_with_pipe = matches!(tokens.first(), Some(RawToken::Word(w)) if w == "|");
    let ends_with_pipe = matches!(tokens.last(), Some(RawToken::Word(w)) if w == "|");
    if starts_with_pipe || ends_with_pipe {
        return Err("jsh: parse error near '|'".to_string());
    }
    for pair in tokens.windows(2) {
        if let [RawToken::Word(a), RawToken::Word(b)] = pair {
            if a == "|" && b == "|" {
                return Err("jsh: parse error near '|'".to_string());
            }
        }
    }

    let mut groups: Vec<Vec<RawToken>> = vec![Vec::new()];
    for token in tokens {
        match &token {
            RawToken::Word(w) if w == "|" => groups.push(Vec::new()),
            _ => groups.last_mut().unwrap().push(token),
        }
    }

    if groups.len() > 1 && groups.iter().any(|g| g.is_empty()) {
        return Err("jsh: parse error near '|'".to_string());
    }

    let commands = groups
        .into_iter()
        .map(build_command)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Pipeline { commands, to_job })
}

fn build_command(mut tokens: Vec<RawToken>) -> Result<Command, String> {
    tokens.truncate(MAX_TOKENS);

    if tokens.is_empty() {
        return Ok(Command::empty());
    }

    let name = match &tokens[0] {
        RawToken::Word(w) if is_redir_op(w) => {
            return Err(format!("jsh: parse error near '{w}'"));
        }
        RawToken::Word(w) => w.clone(),
        RawToken::Substitution(_) => {
            return Err("jsh: parse error near '<('".to_string());
        }
    };

    let mut argv = vec![Argument::Literal(name.clone())];
    let mut redirections = Vec::new();
    let mut i = 1;

    while i < tokens.len() {
        match &tokens[i] {
            RawToken::Word(w) if is_redir_op(w) => {
                let op = w.clone();
                let (channel, mode) = redir_kind(&op);
                let Some(next) = tokens.get(i + 1) else {
                    return Err(format!("jsh: parse error near '{op}'"));
                };
                let target = match next {
                    RawToken::Word(t) if is_redir_op(t) => {
                        return Err(format!("jsh: parse error near '{op}'"));
                    }
                    RawToken::Word(t) => RedirectTarget::File(t.clone()),
                    RawToken::Substitution(inner) => {
                        if channel != Channel::Stdin {
                            return Err(format!("jsh: parse error near '{op}'"));
                        }
                        RedirectTarget::Substitution(parse_pipeline_text(inner, false)?)
                    }
                };
                redirections.push(Redirection {
                    channel,
                    mode,
                    target,
                });
                i += 2;
            }
            RawToken::Word(w) => {
                argv.push(Argument::Literal(w.clone()));
                i += 1;
            }
            RawToken::Substitution(inner) => {
                argv.push(Argument::Substitution(Box::new(parse_pipeline_text(
                    inner, false,
                )?)));
                i += 1;
            }
        }
    }

    Ok(Command {
        name: Some(name),
        argv,
        redirections,
    })
}
