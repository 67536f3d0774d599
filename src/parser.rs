//! Script line parser
//!
//! One line holds, in order: an optional `!` or `?` prefix, any number of
//! `[cond]` guards, the command name, and its arguments.
//!
//! - `#` at the start of a line is a section comment (handled by the engine)
//! - an unquoted `#` elsewhere ends the line
//! - single quotes disable word splitting and variable expansion
//! - `''` inside quotes is a literal `'`
//!
//! Variable expansion happens later, in the engine, so words keep track of
//! which fragments were quoted.

use crate::dispatch::Negation;

/// A piece of one argument word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgFragment {
    pub s: String,
    /// Inside single quotes: never expanded
    pub quoted: bool,
}

/// A `[cond]` or `[!cond]` guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    /// Condition tag, e.g. `unix` or `exec:git`
    pub tag: String,
    pub negate: bool,
}

/// A decoded script line, before variable expansion
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub neg: Negation,
    pub guards: Vec<Guard>,
    pub command: String,
    pub args: Vec<Vec<ArgFragment>>,
    /// Original text, for the log and error messages
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

fn parse_error(message: &str) -> ParseError {
    ParseError { message: message.to_string() }
}

/// Parse one script line. Blank and comment-only lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ParsedLine>, ParseError> {
    let words = split_words(line)?;

    let mut neg = Negation::Assert;
    let mut prefixed = false;
    let mut guards = Vec::new();
    let mut rest = words.into_iter();
    let mut command = None;

    for word in rest.by_ref() {
        let bare = match word.as_slice() {
            [frag] if !frag.quoted => Some(frag.s.as_str()),
            _ => None,
        };
        match bare {
            Some("!") | Some("?") => {
                if prefixed || !guards.is_empty() {
                    return Err(parse_error("duplicated or misplaced '!' or '?' token"));
                }
                prefixed = true;
                neg = if bare == Some("!") { Negation::Negate } else { Negation::Absent };
            }
            Some(tok) if tok.starts_with('[') && tok.ends_with(']') && tok.len() >= 2 => {
                let inner = tok[1..tok.len() - 1].trim();
                let (negate, tag) = match inner.strip_prefix('!') {
                    Some(t) => (true, t.trim()),
                    None => (false, inner),
                };
                if tag.is_empty() {
                    return Err(parse_error("empty condition"));
                }
                guards.push(Guard { tag: tag.to_string(), negate });
            }
            _ => {
                let name: String = word.iter().map(|f| f.s.as_str()).collect();
                if name.is_empty() {
                    return Err(parse_error("empty command"));
                }
                command = Some(name);
                break;
            }
        }
    }

    let args: Vec<_> = rest.collect();
    match command {
        Some(command) => Ok(Some(ParsedLine {
            neg,
            guards,
            command,
            args,
            raw: line.trim().to_string(),
        })),
        None if prefixed || !guards.is_empty() => Err(parse_error("missing command")),
        None => Ok(None),
    }
}

/// Split a line into words of fragments, stopping at an unquoted `#`.
fn split_words(line: &str) -> Result<Vec<Vec<ArgFragment>>, ParseError> {
    let mut words = Vec::new();
    let mut word: Vec<ArgFragment> = Vec::new();
    let mut buf = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            if c != '\'' {
                buf.push(c);
            } else if chars.peek() == Some(&'\'') {
                chars.next();
                buf.push('\'');
            } else {
                word.push(ArgFragment { s: std::mem::take(&mut buf), quoted: true });
                quoted = false;
            }
            continue;
        }
        match c {
            '\'' => {
                if !buf.is_empty() {
                    word.push(ArgFragment { s: std::mem::take(&mut buf), quoted: false });
                }
                in_word = true;
                quoted = true;
            }
            ' ' | '\t' | '\r' | '\n' | '#' => {
                if in_word {
                    if !buf.is_empty() {
                        word.push(ArgFragment { s: std::mem::take(&mut buf), quoted: false });
                    }
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
                if c == '#' {
                    return Ok(words);
                }
            }
            _ => {
                in_word = true;
                buf.push(c);
            }
        }
    }

    if quoted {
        return Err(parse_error("unterminated quoted argument"));
    }
    if in_word {
        if !buf.is_empty() {
            word.push(ArgFragment { s: buf, quoted: false });
        }
        words.push(word);
    }
    Ok(words)
}

/// Expand `$VAR` and `${VAR}` references. Undefined variables expand to
/// the empty string; a `$` not followed by a name is kept literally.
pub fn expand_env(s: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&name);
                continue;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
        }
        out.push_str(&lookup(&name).unwrap_or_default());
    }
    out
}

/// Quote an argument for display when it contains separators or quotes.
pub fn quote_arg(s: &str) -> String {
    const NEED_QUOTE: &[char] = &['\'', ' ', '\t', '\r', '\n', '#'];
    if s.is_empty() || s.contains(NEED_QUOTE) {
        format!("'{}'", s.replace('\'', "''"))
    } else {
        s.to_string()
    }
}
