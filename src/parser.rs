//! Test database parser.
//!
//! A document is a sequence of `KEY=VALUE` directives closed by a bare `RUN`
//! line. Values of `CMDS`, `EXPECT` and `EXPECT_ERR` may span several lines
//! using either heredoc (`<<TERM`) or delimiter (`%...%`) quoting.

use crate::case::{Category, ExecProfile, Expectation, TestCase, ValueStyle};
use crate::compare::{Comparison, decode_base64};
use crate::expand::{self, ExpandError};

/// Characters that open a delimited value.
pub const DELIMITERS: [char; 3] = ['%', '"', '\''];

/// Heredoc terminator whose line is consumed along with the value.
pub const EOF_TERMINATOR: &str = "EOF";

const RUN: &str = "RUN";

/// Error raised while parsing a document. Fatal to the whole document.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{origin}:{line}: invalid line {text:?} (expected KEY=VALUE or RUN)")]
    InvalidLine {
        origin: String,
        line: usize,
        text: String,
    },
    #[error("{origin}:{line}: unknown key {key:?}")]
    UnknownKey {
        origin: String,
        line: usize,
        key: String,
    },
    #[error("{origin}:{line}: unexpected end of file in {key} -- did you forget a {terminator}?")]
    MissingTerminator {
        origin: String,
        line: usize,
        key: String,
        terminator: String,
    },
    #[error("{origin}:{line}: empty heredoc terminator in {key}")]
    EmptyTerminator {
        origin: String,
        line: usize,
        key: String,
    },
    #[error("{origin}:{line}: invalid base64 in {key}: {source}")]
    Base64 {
        origin: String,
        line: usize,
        key: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("{origin}:{line}: {source}")]
    Expand {
        origin: String,
        line: usize,
        #[source]
        source: ExpandError,
    },
}

/// Settings that shape how documents expand into cases.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Sample files each structural-output command is run against.
    pub json_samples: Vec<String>,
}

/// Cursor over the lines of a document.
pub struct LineCursor<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.split('\n').collect(),
            pos: 0,
        }
    }

    pub fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    pub fn advance(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    /// Step back so the last consumed line is returned again by `advance`.
    pub fn rewind(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// 1-based number of the last consumed line.
    pub fn line_no(&self) -> usize {
        self.pos
    }

    /// Consume lines up to and including the first one matching `stop`.
    ///
    /// Returns the lines before the match and the matching line, or `None`
    /// when the document ends first.
    pub fn consume_until(
        &mut self,
        stop: impl Fn(&str) -> bool,
    ) -> Option<(Vec<&'a str>, &'a str)> {
        let mut body = Vec::new();
        while let Some(line) = self.advance() {
            if stop(line) {
                return Some((body, line));
            }
            body.push(line);
        }
        None
    }
}

/// Parse one document into test cases.
pub fn parse_document(
    origin: &str,
    text: &str,
    options: &ParseOptions,
) -> Result<Vec<TestCase>, ParseError> {
    Parser::new(origin, Category::from_origin(origin), options).parse(text)
}

struct Parser<'a> {
    origin: &'a str,
    category: Category,
    options: &'a ParseOptions,
    cases: Vec<TestCase>,
    record: TestCase,
}

impl<'a> Parser<'a> {
    fn new(origin: &'a str, category: Category, options: &'a ParseOptions) -> Self {
        Self {
            origin,
            category,
            options,
            cases: Vec::new(),
            record: TestCase::new(origin, category),
        }
    }

    fn parse(mut self, text: &str) -> Result<Vec<TestCase>, ParseError> {
        let mut cursor = LineCursor::new(text);
        while let Some(raw) = cursor.advance() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.category {
                Category::Asm | Category::Json => {
                    if line != RUN {
                        self.expand_line(line, cursor.line_no())?;
                    }
                    continue;
                }
                _ => {}
            }
            if line == RUN {
                self.dispatch();
                continue;
            }
            let Some((key, value)) = raw.split_once('=') else {
                return Err(ParseError::InvalidLine {
                    origin: self.origin.to_string(),
                    line: cursor.line_no(),
                    text: raw.to_string(),
                });
            };
            self.apply(key.trim(), value, &mut cursor)?;
        }
        if self.record.file.is_some() && !self.record.commands.is_empty() {
            self.dispatch();
        }
        Ok(self.cases)
    }

    fn expand_line(&mut self, line: &str, line_no: usize) -> Result<(), ParseError> {
        let expanded = match self.category {
            Category::Asm => expand::round_trip(self.origin, line),
            _ => expand::json_checks(self.origin, line, &self.options.json_samples),
        };
        let cases = expanded.map_err(|source| ParseError::Expand {
            origin: self.origin.to_string(),
            line: line_no,
            source,
        })?;
        self.cases.extend(cases);
        Ok(())
    }

    fn dispatch(&mut self) {
        let fresh = TestCase::new(self.origin, self.category);
        let mut case = std::mem::replace(&mut self.record, fresh);
        case.profile = ExecProfile::resolve(case.category, &case.needs_plugins);
        self.cases.push(case);
    }

    fn apply(&mut self, key: &str, value: &str, cursor: &mut LineCursor) -> Result<(), ParseError> {
        let line = cursor.line_no();
        let record = &mut self.record;
        match key {
            "NAME" => record.name = value.trim().to_string(),
            "PATH" => record.path = non_empty(value),
            "FILE" => record.file = non_empty(value),
            "ARCH" => record.asm.arch = non_empty(value),
            "BITS" => record.asm.bits = non_empty(value),
            "BROKEN" => record.broken = true,
            "ARGS" => record.extra_args = words(value),
            "NEEDS_PLUGINS" => record.needs_plugins = words(value),
            "CMDS" => {
                let (script, _) = read_value(self.origin, key, value, cursor)?;
                record.set_script(script);
            }
            "CMDS64" => {
                let script = self.decode(key, value, line)?;
                self.record.set_script(script);
            }
            "EXPECT" => {
                let (text, style) = read_value(self.origin, key, value, cursor)?;
                record.expect = Some(Expectation::new(text, style));
                record.comparison = Comparison::Exact;
            }
            "EXPECT64" => {
                let text = self.decode(key, value, line)?;
                self.record.expect = Some(Expectation::new(text, ValueStyle::Base64));
                self.record.comparison = Comparison::Trimmed;
            }
            "EXPECT_ERR" => {
                let (text, style) = read_value(self.origin, key, value, cursor)?;
                record.expect_err = Some(Expectation::new(text, style));
            }
            "EXPECT_ERR64" => {
                let text = self.decode(key, value, line)?;
                self.record.expect_err = Some(Expectation::new(text, ValueStyle::Base64));
            }
            _ => {
                return Err(ParseError::UnknownKey {
                    origin: self.origin.to_string(),
                    line,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn decode(&self, key: &str, value: &str, line: usize) -> Result<String, ParseError> {
        decode_base64(value).map_err(|source| ParseError::Base64 {
            origin: self.origin.to_string(),
            line,
            key: key.to_string(),
            source,
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Read a possibly multi-line value starting on the current line.
///
/// The cursor is left after the last line belonging to the value.
pub fn read_value(
    origin: &str,
    key: &str,
    value: &str,
    cursor: &mut LineCursor,
) -> Result<(String, ValueStyle), ParseError> {
    let line = cursor.line_no();
    let trimmed = value.trim();

    if let Some(terminator) = trimmed.strip_prefix("<<") {
        let terminator = terminator.trim();
        if terminator.is_empty() {
            return Err(ParseError::EmptyTerminator {
                origin: origin.to_string(),
                line,
                key: key.to_string(),
            });
        }
        let text = read_heredoc(cursor, terminator).ok_or_else(|| {
            ParseError::MissingTerminator {
                origin: origin.to_string(),
                line,
                key: key.to_string(),
                terminator: terminator.to_string(),
            }
        })?;
        return Ok((text, ValueStyle::Heredoc(terminator.to_string())));
    }

    if let Some(delim) = trimmed.chars().next().filter(|c| DELIMITERS.contains(c)) {
        let text = read_delimited(cursor, value, delim).ok_or_else(|| {
            ParseError::MissingTerminator {
                origin: origin.to_string(),
                line,
                key: key.to_string(),
                terminator: delim.to_string(),
            }
        })?;
        return Ok((text, ValueStyle::Delimited(delim)));
    }

    let text = if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    };
    Ok((text, ValueStyle::Plain))
}

/// Collect raw lines up to the terminator line.
///
/// `EOF` must match a whole line and that line is consumed. Any other
/// terminator ends the body at the first line starting with it, and the line
/// is left for the caller to scan again, so `CMDS=<<EXPECT` stops at
/// `EXPECT=...`.
fn read_heredoc(cursor: &mut LineCursor, terminator: &str) -> Option<String> {
    let (body, _) = if terminator == EOF_TERMINATOR {
        cursor.consume_until(|line| line == terminator)?
    } else {
        let found = cursor.consume_until(|line| line.starts_with(terminator))?;
        cursor.rewind();
        found
    };
    let mut text = String::new();
    for line in body {
        text.push_str(line);
        text.push('\n');
    }
    Some(text)
}

/// Read a value quoted by `delim`, continuing onto following lines when the
/// closing delimiter is not on the first one.
fn read_delimited(cursor: &mut LineCursor, value: &str, delim: char) -> Option<String> {
    let (_, rest) = value.split_once(delim)?;
    if let Some((inner, _)) = rest.split_once(delim) {
        return Some(inner.to_string());
    }
    let mut text = format!("{rest}\n");
    let (body, last) = cursor.consume_until(|line| line.contains(delim))?;
    for line in body {
        text.push_str(line);
        text.push('\n');
    }
    let head = last.split_once(delim).map_or(last, |(head, _)| head);
    text.push_str(head);
    Some(text)
}
