//! Result evaluation and bucketing.

use crate::case::{Abnormal, Execution, Invocation, TestCase};
use crate::compare::{Comparison, exact, json_error};
use std::time::Duration;

/// Per-stream outcome of comparing one execution against its case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub stdout_ok: bool,
    pub stderr_ok: bool,
    /// The subject ran to a normal exit.
    pub exited: bool,
    /// Parser message when structural-validity checking rejected stdout.
    pub json_error: Option<String>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.exited && self.stdout_ok && self.stderr_ok
    }
}

/// Compare captured output against the case's expectations.
///
/// A stream without an expectation never fails the case.
pub fn evaluate(case: &TestCase, execution: &Execution) -> Verdict {
    let mut json = None;
    let stdout_ok = match (case.comparison, &case.expect) {
        (Comparison::JsonValid, _) => {
            json = json_error(&execution.stdout).map(|e| e.to_string());
            json.is_none()
        }
        (comparison, Some(expect)) => comparison.matches(&expect.text, &execution.stdout),
        (_, None) => true,
    };
    let stderr_ok = case
        .expect_err
        .as_ref()
        .is_none_or(|expect| exact(&expect.text, &execution.stderr));

    Verdict {
        stdout_ok,
        stderr_ok,
        exited: execution.abnormal.is_none(),
        json_error: json,
    }
}

/// The bucket a completed case lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    Broken,
    Fixed,
}

impl Outcome {
    pub fn glyph(self) -> &'static str {
        match self {
            Outcome::Success => "[OK]",
            Outcome::Failed => "[XX]",
            Outcome::Broken => "[BR]",
            Outcome::Fixed => "[FX]",
        }
    }
}

pub fn classify(case: &TestCase, execution: &Execution, verdict: &Verdict) -> Outcome {
    match &execution.abnormal {
        Some(Abnormal::MissingCapability(_)) => return Outcome::Broken,
        Some(_) if case.invocation == Invocation::Fuzz => return Outcome::Failed,
        _ => {}
    }
    match (case.broken, verdict.passed()) {
        (true, true) => Outcome::Fixed,
        (true, false) => Outcome::Broken,
        (false, true) => Outcome::Success,
        (false, false) => Outcome::Failed,
    }
}

/// Outcome counts for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Summary {
    pub success: usize,
    pub failed: usize,
    pub broken: usize,
    pub fixed: usize,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
}

impl Summary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Broken => self.broken += 1,
            Outcome::Fixed => self.fixed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.failed + self.broken + self.fixed
    }

    /// Fold another document's counts into this one.
    pub fn absorb(&mut self, other: &Summary) {
        self.success += other.success;
        self.failed += other.failed;
        self.broken += other.broken;
        self.fixed += other.fixed;
        self.elapsed += other.elapsed;
    }
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Category, Expectation, ValueStyle};

    fn case(expect: Option<&str>, comparison: Comparison) -> TestCase {
        let mut case = TestCase::new("db/cmd/t", Category::Command);
        case.expect = expect.map(|e| Expectation::new(e, ValueStyle::Plain));
        case.comparison = comparison;
        case
    }

    fn ran(stdout: &str, stderr: &str) -> Execution {
        let mut execution = Execution::skipped(Abnormal::Spawn(String::new()));
        execution.abnormal = None;
        execution.stdout = stdout.to_string();
        execution.stderr = stderr.to_string();
        execution
    }

    #[test]
    fn exact_expectation() {
        let case = case(Some("hi\n"), Comparison::Exact);
        assert!(evaluate(&case, &ran("hi\n", "")).passed());
        assert!(!evaluate(&case, &ran("hi", "")).passed());
    }

    #[test]
    fn trimmed_expectation() {
        let case = case(Some("mov eax, ebx"), Comparison::Trimmed);
        assert!(evaluate(&case, &ran("mov eax, ebx\n", "")).passed());
    }

    #[test]
    fn missing_expectations_never_fail() {
        let case = case(None, Comparison::Exact);
        let verdict = evaluate(&case, &ran("anything", "warnings"));
        assert!(verdict.stdout_ok && verdict.stderr_ok);
    }

    #[test]
    fn stderr_compared_exactly_when_declared() {
        let mut case = case(None, Comparison::Trimmed);
        case.expect_err = Some(Expectation::new("oops\n", ValueStyle::Plain));
        assert!(evaluate(&case, &ran("", "oops\n")).passed());
        let verdict = evaluate(&case, &ran("", "oops"));
        assert!(verdict.stdout_ok);
        assert!(!verdict.stderr_ok);
    }

    #[test]
    fn json_validity_ignores_expectation() {
        let case = case(Some("ignored"), Comparison::JsonValid);
        assert!(evaluate(&case, &ran("{\"ok\":true}", "")).passed());
        assert!(evaluate(&case, &ran("", "")).passed());
        let verdict = evaluate(&case, &ran("{broken", ""));
        assert!(!verdict.passed());
        assert!(verdict.json_error.is_some());
    }

    #[test]
    fn buckets() {
        let mut case = case(Some("hi\n"), Comparison::Exact);
        let good = ran("hi\n", "");
        let bad = ran("bye\n", "");
        assert_eq!(classify(&case, &good, &evaluate(&case, &good)), Outcome::Success);
        assert_eq!(classify(&case, &bad, &evaluate(&case, &bad)), Outcome::Failed);
        case.broken = true;
        assert_eq!(classify(&case, &good, &evaluate(&case, &good)), Outcome::Fixed);
        assert_eq!(classify(&case, &bad, &evaluate(&case, &bad)), Outcome::Broken);
    }

    #[test]
    fn missing_capability_is_always_broken() {
        let case = case(None, Comparison::Trimmed);
        let skipped = Execution::skipped(Abnormal::MissingCapability("io_x".into()));
        let verdict = evaluate(&case, &skipped);
        assert_eq!(classify(&case, &skipped, &verdict), Outcome::Broken);
    }

    #[test]
    fn spawn_failure_fails_the_case() {
        let case = case(None, Comparison::Trimmed);
        let failed = Execution::skipped(Abnormal::Spawn("no such file".into()));
        assert_eq!(classify(&case, &failed, &evaluate(&case, &failed)), Outcome::Failed);
    }

    #[test]
    fn fuzz_abnormal_is_forced_failure() {
        let mut case = TestCase::new("fuzz", Category::Fuzz);
        case.broken = true;
        let timed_out = Execution::skipped(Abnormal::Timeout(60));
        let verdict = evaluate(&case, &timed_out);
        assert_eq!(classify(&case, &timed_out, &verdict), Outcome::Failed);
        let fine = ran("init\n", "");
        case.broken = false;
        assert_eq!(classify(&case, &fine, &evaluate(&case, &fine)), Outcome::Success);
    }

    #[test]
    fn summary_total_is_sum_of_buckets() {
        let mut summary = Summary::default();
        for outcome in [
            Outcome::Success,
            Outcome::Success,
            Outcome::Failed,
            Outcome::Broken,
            Outcome::Fixed,
        ] {
            summary.record(outcome);
        }
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.success, 2);

        let mut all = Summary::default();
        all.absorb(&summary);
        all.absorb(&summary);
        assert_eq!(all.total(), 10);
        assert_eq!(all.failed, 2);
    }
}
