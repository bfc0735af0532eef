//! Run reporting: live status lines, failure diagnostics and the final
//! machine-readable reports.

use crate::case::{Abnormal, Completed, Execution, TestCase, ValueStyle};
use crate::classify::{Outcome, Summary, Verdict, serialize_duration};
use crate::compare::encode_base64;
use crate::parser::{DELIMITERS, EOF_TERMINATOR};
use clap::ValueEnum;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Live status lines and failure diagnostics
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

/// Environment variables that mark a CI run.
const CI_VARS: [&str; 3] = ["CI", "TRAVIS", "APPVEYOR"];

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub format: OutputFormat,
    /// Subject executable, shown in failure diagnostics.
    pub subject: String,
    /// Print diagnostics for broken cases too.
    pub verbose: bool,
    /// Hide `[OK]` lines.
    pub hide_ok: bool,
    /// Running under CI; broken-case diagnostics stay quiet.
    pub ci: bool,
}

impl ReportOptions {
    pub fn from_env(format: OutputFormat, subject: &str, verbose: bool) -> Self {
        let ci = CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self {
            format,
            subject: subject.to_string(),
            verbose,
            hide_ok: ci || std::env::var_os("NOOK").is_some(),
            ci,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct CaseReport {
    name: String,
    target: String,
    outcome: Outcome,
    #[serde(serialize_with = "serialize_duration")]
    duration: Duration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
struct DocumentReport {
    origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    summary: Summary,
    cases: Vec<CaseReport>,
}

/// Collects per-case results and prints them in the selected format.
#[derive(Debug)]
pub struct Reporter {
    options: ReportOptions,
    pending: Vec<CaseReport>,
    documents: Vec<DocumentReport>,
}

impl Reporter {
    pub fn new(options: ReportOptions) -> Self {
        Self {
            options,
            pending: Vec::new(),
            documents: Vec::new(),
        }
    }

    fn human(&self) -> bool {
        self.options.format == OutputFormat::Human
    }

    /// Report one completed case as soon as it is classified.
    pub fn case_finished(&mut self, completed: &Completed, verdict: &Verdict, outcome: Outcome) {
        let Completed { case, execution } = completed;
        if let Some(message) = &verdict.json_error {
            if case.broken {
                warn!(origin = %case.origin, name = %case.name, "invalid JSON output: {message}");
            } else {
                error!(origin = %case.origin, name = %case.name, "invalid JSON output: {message}");
            }
        }

        if !self.human() {
            self.pending.push(CaseReport {
                name: case.name.clone(),
                target: case.target().to_string(),
                outcome,
                duration: execution.lifetime(),
                failures: failure_reasons(case, execution, verdict),
            });
            return;
        }

        if outcome != Outcome::Success || !self.options.hide_ok {
            println!("{}", status_line(case, execution, outcome));
        }
        let diagnose = match outcome {
            Outcome::Failed => true,
            Outcome::Broken => self.options.verbose && !self.options.ci,
            _ => false,
        };
        if diagnose {
            print!("{}", failure_block(&self.options.subject, completed, verdict));
        }
    }

    pub fn document_finished(&mut self, origin: &str, summary: &Summary) {
        let cases = std::mem::take(&mut self.pending);
        if self.human() {
            println!("{}", summary_line(origin, summary));
        } else {
            self.documents.push(DocumentReport {
                origin: origin.to_string(),
                error: None,
                summary: summary.clone(),
                cases,
            });
        }
    }

    /// A document that could not be loaded or parsed. None of its cases ran.
    pub fn document_failed(&mut self, origin: &str, message: &str) {
        self.pending.clear();
        if self.human() {
            eprintln!("[!!] {origin}: {message}");
        } else {
            self.documents.push(DocumentReport {
                origin: origin.to_string(),
                error: Some(message.to_string()),
                summary: Summary::default(),
                cases: Vec::new(),
            });
        }
    }

    /// Print the run totals, or the whole machine-readable report.
    pub fn finish(self, total: &Summary) {
        match self.options.format {
            OutputFormat::Human => println!("{}", summary_line("total", total)),
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "success": total.success,
                    "failed": total.failed,
                    "broken": total.broken,
                    "fixed": total.fixed,
                    "total": total.total(),
                    "elapsed": total.elapsed.as_secs_f64(),
                    "documents": self.documents,
                });
                match serde_json::to_string_pretty(&output) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!("failed to serialize report: {e}"),
                }
            }
            OutputFormat::Junit => print!("{}", format_junit_xml(&self.documents, total.elapsed)),
        }
    }
}

pub fn status_line(case: &TestCase, execution: &Execution, outcome: Outcome) -> String {
    format!(
        "{} {} {} {} ({:.2?})",
        outcome.glyph(),
        case.origin,
        case.name,
        case.target(),
        execution.lifetime()
    )
}

pub fn summary_line(origin: &str, summary: &Summary) -> String {
    format!(
        "[**] {origin:<30}  OK {} BR {} XX {} FX {} ({:.2?})",
        summary.success, summary.broken, summary.failed, summary.fixed, summary.elapsed
    )
}

/// Invocation, command script, diffs and paste-ready expectations.
pub fn failure_block(subject: &str, completed: &Completed, verdict: &Verdict) -> String {
    let Completed { case, execution } = completed;
    let mut out = String::new();
    let _ = writeln!(out, "$ {subject} {}", shell_words(&execution.spawn_args));
    if let Some(abnormal) = &execution.abnormal {
        let _ = writeln!(out, "!!! {}", describe_abnormal(abnormal));
    }
    if !case.script.is_empty() {
        let _ = writeln!(out, "--- script");
        out.push_str(&case.script);
        if !case.script.ends_with('\n') {
            out.push('\n');
        }
    }
    if let Some(message) = &verdict.json_error {
        let _ = writeln!(out, "--- invalid JSON: {message}");
    }
    if !verdict.stdout_ok
        && let Some(expect) = &case.expect
        && verdict.json_error.is_none()
    {
        let _ = writeln!(out, "--- stdout");
        out.push_str(&unified_diff(&expect.text, &execution.stdout));
        if let Some(line) = suggestion("EXPECT", &execution.stdout, &expect.style) {
            let _ = writeln!(out, "{line}");
        }
    }
    if !verdict.stderr_ok
        && let Some(expect) = &case.expect_err
    {
        let _ = writeln!(out, "--- stderr");
        out.push_str(&unified_diff(&expect.text, &execution.stderr));
        if let Some(line) = suggestion("EXPECT_ERR", &execution.stderr, &expect.style) {
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

fn failure_reasons(case: &TestCase, execution: &Execution, verdict: &Verdict) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(abnormal) = &execution.abnormal {
        reasons.push(describe_abnormal(abnormal));
    }
    if let Some(message) = &verdict.json_error {
        reasons.push(format!("invalid JSON output: {message}"));
    } else if !verdict.stdout_ok
        && let Some(expect) = &case.expect
    {
        reasons.push(format!(
            "stdout mismatch:\n{}",
            unified_diff(&expect.text, &execution.stdout)
        ));
    }
    if !verdict.stderr_ok
        && let Some(expect) = &case.expect_err
    {
        reasons.push(format!(
            "stderr mismatch:\n{}",
            unified_diff(&expect.text, &execution.stderr)
        ));
    }
    reasons
}

fn describe_abnormal(abnormal: &Abnormal) -> String {
    match abnormal {
        Abnormal::Spawn(reason) => reason.clone(),
        Abnormal::Timeout(secs) => format!("timed out after {secs}s"),
        Abnormal::MissingCapability(capability) => {
            format!("missing capability {capability:?}, not run")
        }
    }
}

fn unified_diff(expected: &str, actual: &str) -> String {
    similar::TextDiff::from_lines(expected, actual)
        .unified_diff()
        .header("expected", "actual")
        .to_string()
}

fn shell_words(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "'\"$;~?".contains(c)) {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A `KEY=...` block that parses back to exactly `actual`.
///
/// Prefers the style the expectation was written in, then any delimiter not
/// in the text, then an `EOF` heredoc, then base64. Expander-generated
/// expectations have no directive and get no suggestion.
pub fn suggestion(key: &str, actual: &str, style: &ValueStyle) -> Option<String> {
    let preferred = match style {
        ValueStyle::Generated => return None,
        ValueStyle::Plain => plain(key, actual),
        ValueStyle::Delimited(delim) => delimited(key, actual, *delim),
        ValueStyle::Heredoc(terminator) => heredoc(key, actual, terminator),
        ValueStyle::Base64 => Some(format!("{key}64={}", encode_base64(actual))),
    };
    preferred
        .or_else(|| DELIMITERS.iter().find_map(|&d| delimited(key, actual, d)))
        .or_else(|| heredoc(key, actual, EOF_TERMINATOR))
        .or_else(|| Some(format!("{key}64={}", encode_base64(actual))))
}

fn plain(key: &str, actual: &str) -> Option<String> {
    if actual.is_empty() {
        return Some(format!("{key}="));
    }
    let line = actual.strip_suffix('\n')?;
    let simple = !line.is_empty()
        && !line.contains('\n')
        && line.trim() == line
        && !line.starts_with("<<")
        && !line.starts_with(DELIMITERS);
    simple.then(|| format!("{key}={line}"))
}

fn delimited(key: &str, actual: &str, delim: char) -> Option<String> {
    (!actual.contains(delim)).then(|| format!("{key}={delim}{actual}{delim}"))
}

fn heredoc(key: &str, actual: &str, terminator: &str) -> Option<String> {
    let ends_body = |line: &str| {
        if terminator == EOF_TERMINATOR {
            line == terminator
        } else {
            line.starts_with(terminator)
        }
    };
    let fits = (actual.is_empty() || actual.ends_with('\n')) && !actual.lines().any(ends_body);
    fits.then(|| format!("{key}=<<{terminator}\n{actual}{terminator}"))
}

/// Format document results as JUnit XML.
fn format_junit_xml(documents: &[DocumentReport], total_time: Duration) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");

    let tests: usize = documents.iter().map(document_tests).sum();
    let failures: usize = documents.iter().map(document_failures).sum();
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{tests}\" failures=\"{failures}\" time=\"{:.3}\">",
        total_time.as_secs_f64()
    );

    for document in documents {
        let _ = writeln!(
            xml,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
            escape_xml(&document.origin),
            document_tests(document),
            document_failures(document),
            document.summary.broken,
            document.summary.elapsed.as_secs_f64()
        );

        if let Some(message) = &document.error {
            xml.push_str("    <testcase name=\"&lt;load&gt;\" time=\"0.000\">\n");
            let _ = writeln!(xml, "      <failure message=\"{}\"/>", escape_xml(message));
            xml.push_str("    </testcase>\n");
        }

        for case in &document.cases {
            let _ = writeln!(
                xml,
                "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\">",
                escape_xml(&case.name),
                escape_xml(&case.target),
                case.duration.as_secs_f64()
            );
            match case.outcome {
                Outcome::Failed => {
                    let message = case.failures.first().map_or("Test failed", |s| {
                        s.lines().next().unwrap_or("Test failed")
                    });
                    let _ = writeln!(xml, "      <failure message=\"{}\">", escape_xml(message));
                    for failure in &case.failures {
                        let _ = writeln!(xml, "{}", escape_xml(failure));
                    }
                    xml.push_str("      </failure>\n");
                }
                Outcome::Broken => xml.push_str("      <skipped message=\"known broken\"/>\n"),
                Outcome::Success | Outcome::Fixed => {}
            }
            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
    }

    xml.push_str("</testsuites>\n");
    xml
}

/// A load error counts as one synthetic failed test.
fn document_tests(document: &DocumentReport) -> usize {
    document.cases.len() + usize::from(document.error.is_some())
}

fn document_failures(document: &DocumentReport) -> usize {
    document.summary.failed + usize::from(document.error.is_some())
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
