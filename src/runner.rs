//! Document orchestration.
//!
//! Loads each document, expands it into cases, submits the cases in file
//! order through the limiter and classifies completions as they arrive.

use crate::case::{Category, Completed, TestCase};
use crate::classify::{Outcome, Summary, classify, evaluate};
use crate::config::SuiteConfig;
use crate::executor::Executor;
use crate::limiter::Limiter;
use crate::loader::{self, LoadError};
use crate::parser::{ParseError, ParseOptions, parse_document};
use crate::report::Reporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Why a document produced no cases.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("cannot list load targets in {}: {source}", path.display())]
    Targets {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-run selection settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Keep only cases whose name contains this substring.
    pub filter: Option<String>,
    /// Print the cases instead of running them.
    pub list: bool,
}

/// Totals for a whole run.
#[derive(Debug, Default)]
pub struct RunResult {
    pub total: Summary,
    /// Documents that failed to load or parse.
    pub errors: usize,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.total.failed == 0 && self.errors == 0
    }
}

pub struct Runner {
    executor: Arc<Executor>,
    limiter: Limiter,
    parse_options: ParseOptions,
    root: Option<PathBuf>,
}

impl Runner {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            executor: Arc::new(Executor::new(config)),
            limiter: Limiter::new(config.jobs),
            parse_options: ParseOptions {
                json_samples: config
                    .json_samples
                    .iter()
                    .map(|sample| under_root(config.root.as_deref(), sample).display().to_string())
                    .collect(),
            },
            root: config.root.clone(),
        }
    }

    /// Read, parse and expand one document.
    pub fn load_document(&self, path: &Path, origin: &str) -> Result<Vec<TestCase>, DocumentError> {
        let text = loader::read_document(path)?;
        let cases = parse_document(origin, &text, &self.parse_options)?;
        let mut expanded = Vec::with_capacity(cases.len());
        for case in cases {
            if case.category == Category::Bin {
                expanded.extend(self.load_targets(case)?);
            } else {
                expanded.push(case);
            }
        }
        Ok(expanded)
    }

    /// One load case per file below the record's `PATH=` directory.
    fn load_targets(&self, record: TestCase) -> Result<Vec<TestCase>, DocumentError> {
        let Some(dir) = record.path.clone() else {
            if record.file.is_none() {
                warn!(
                    origin = %record.origin,
                    name = %record.name,
                    "load record without PATH or FILE, skipped"
                );
                return Ok(Vec::new());
            }
            return Ok(vec![record]);
        };
        let dir = under_root(self.root.as_deref(), &dir);
        let files = loader::list_files(&dir).map_err(|source| DocumentError::Targets {
            path: dir.clone(),
            source,
        })?;
        Ok(files
            .into_iter()
            .map(|file| {
                let mut case = record.clone();
                case.file = Some(file.display().to_string());
                case
            })
            .collect())
    }

    /// Run every document in order. Each document's batch finishes before
    /// the next one starts.
    pub async fn run_documents(
        &self,
        documents: &[(PathBuf, String)],
        options: &RunOptions,
        reporter: &mut Reporter,
    ) -> RunResult {
        let mut result = RunResult::default();
        for (path, origin) in documents {
            let mut cases = match self.load_document(path, origin) {
                Ok(cases) => cases,
                Err(e) => {
                    error!(origin = %origin, "{e}");
                    reporter.document_failed(origin, &e.to_string());
                    result.errors += 1;
                    continue;
                }
            };
            if let Some(filter) = &options.filter {
                cases.retain(|case| case.name.contains(filter.as_str()));
            }
            if cases.is_empty() {
                debug!(origin = %origin, "no cases selected");
                continue;
            }
            if options.list {
                for case in &cases {
                    println!("{} {} {}", case.origin, case.name, case.target());
                }
                continue;
            }

            info!(
                origin = %origin,
                cases = cases.len(),
                jobs = self.limiter.bound(),
                "running document"
            );
            let summary = self.run_cases(cases, reporter).await;
            reporter.document_finished(origin, &summary);
            result.total.absorb(&summary);
        }
        result
    }

    /// Run a batch of cases and return its summary once all have completed.
    ///
    /// Cases are admitted in order; completions are classified as they
    /// arrive, including while the next case waits for a free slot.
    pub async fn run_cases(&self, cases: Vec<TestCase>, reporter: &mut Reporter) -> Summary {
        let started = Instant::now();
        let mut summary = Summary::default();
        let mut tasks = JoinSet::new();

        for case in cases {
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        complete(joined, &mut summary, reporter);
                    }
                    permit = self.limiter.admit() => break permit,
                }
            };
            debug!(
                origin = %case.origin,
                name = %case.name,
                in_flight = self.limiter.in_flight(),
                "admitted"
            );
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let execution = executor.execute(&case).await;
                drop(permit);
                Completed { case, execution }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            complete(joined, &mut summary, reporter);
        }

        summary.elapsed = started.elapsed();
        summary
    }

    /// One fuzz case per file below `dir`.
    pub fn fuzz_cases(&self, dir: &Path) -> Result<Vec<TestCase>, DocumentError> {
        let origin = dir.display().to_string();
        let files = loader::list_files(dir).map_err(|source| DocumentError::Targets {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(files
            .into_iter()
            .map(|file| {
                let mut case = TestCase::new(&origin, Category::Fuzz);
                case.name = file
                    .strip_prefix(dir)
                    .unwrap_or(&file)
                    .display()
                    .to_string();
                case.file = Some(file.display().to_string());
                case
            })
            .collect())
    }
}

fn complete(joined: Result<Completed, JoinError>, summary: &mut Summary, reporter: &mut Reporter) {
    match joined {
        Ok(completed) => {
            let verdict = evaluate(&completed.case, &completed.execution);
            let outcome = classify(&completed.case, &completed.execution, &verdict);
            summary.record(outcome);
            reporter.case_finished(&completed, &verdict, outcome);
        }
        Err(e) => {
            error!("case task failed: {e}");
            summary.record(Outcome::Failed);
        }
    }
}

/// Pair every document below `path` with its origin label.
///
/// Origins are relative to the parent of a directory argument, so a run
/// over `db` reports `db/cmd/...`. A file argument is its own origin.
pub fn collect_documents(path: &Path) -> Result<Vec<(PathBuf, String)>, std::io::Error> {
    if path.is_file() {
        return Ok(vec![(path.to_path_buf(), path.display().to_string())]);
    }
    let base = path.parent().unwrap_or(Path::new(""));
    Ok(loader::find_documents(path)?
        .into_iter()
        .map(|doc| {
            let origin = doc.strip_prefix(base).unwrap_or(&doc).display().to_string();
            (doc, origin)
        })
        .collect())
}

/// Resolve a relative path from the config against the test root.
fn under_root(root: Option<&Path>, path: &str) -> PathBuf {
    match root {
        Some(root) if Path::new(path).is_relative() => root.join(path),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{OutputFormat, ReportOptions};
    use tempfile::tempdir;

    fn quiet_reporter() -> Reporter {
        Reporter::new(ReportOptions {
            format: OutputFormat::Json,
            ..ReportOptions::default()
        })
    }

    fn runner(subject: &str, root: Option<&Path>) -> Runner {
        let config = SuiteConfig {
            subject: subject.to_string(),
            root: root.map(Path::to_path_buf),
            json_samples: vec!["s1".into(), "s2".into()],
            ..SuiteConfig::default()
        };
        Runner::new(&config)
    }

    #[test]
    fn collect_documents_labels_relative_to_parent() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        std::fs::create_dir_all(db.join("asm")).unwrap();
        std::fs::write(db.join("asm/x86_32"), "").unwrap();

        let documents = collect_documents(&db).unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].0, db.join("asm/x86_32"));
        assert_eq!(Path::new(&documents[0].1), Path::new("db/asm/x86_32"));
    }

    #[test]
    fn load_document_expands_bin_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bins/elf")).unwrap();
        std::fs::write(dir.path().join("bins/elf/a"), "").unwrap();
        std::fs::write(dir.path().join("bins/elf/b"), "").unwrap();
        let doc = dir.path().join("elf");
        std::fs::write(&doc, "NAME=load elf\nPATH=bins/elf\nRUN\n").unwrap();

        let runner = runner("radare2", Some(dir.path()));
        let cases = runner.load_document(&doc, "db/bin/elf").unwrap();
        let targets: Vec<&str> = cases.iter().map(TestCase::target).collect();
        let a = dir.path().join("bins/elf/a").display().to_string();
        let b = dir.path().join("bins/elf/b").display().to_string();
        assert_eq!(targets, vec![a.as_str(), b.as_str()]);
        assert!(cases.iter().all(|c| c.name == "load elf"));
    }

    #[test]
    fn load_document_missing_bin_path_is_error() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("elf");
        std::fs::write(&doc, "NAME=x\nPATH=nope\nRUN\n").unwrap();
        let runner = runner("radare2", Some(dir.path()));
        assert!(matches!(
            runner.load_document(&doc, "db/bin/elf"),
            Err(DocumentError::Targets { .. })
        ));
    }

    #[test]
    fn load_document_json_uses_configured_samples() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("json");
        std::fs::write(&doc, "ij\n").unwrap();
        let cases = runner("radare2", None).load_document(&doc, "db/json/json").unwrap();
        let targets: Vec<&str> = cases.iter().map(TestCase::target).collect();
        assert_eq!(targets, vec!["s1", "s2"]);
    }

    #[test]
    fn json_samples_resolve_against_root() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("json");
        std::fs::write(&doc, "ij\n").unwrap();
        let runner = runner("radare2", Some(dir.path()));
        let cases = runner.load_document(&doc, "db/json/json").unwrap();
        let s1 = dir.path().join("s1").display().to_string();
        assert_eq!(cases[0].target(), s1);
    }

    #[test]
    fn fuzz_cases_one_per_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("crash1"), "").unwrap();
        std::fs::write(dir.path().join("crash2"), "").unwrap();
        let cases = runner("radare2", None).fuzz_cases(dir.path()).unwrap();
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["crash1", "crash2"]);
        assert!(cases.iter().all(|c| c.category == Category::Fuzz));
    }

    #[tokio::test]
    async fn run_cases_counts_every_case() {
        // Every spawn fails, so each case lands in exactly one bucket.
        let runner = runner("/nonexistent/r2r-subject", None);
        let mut cases = Vec::new();
        for i in 0..20 {
            let mut case = TestCase::new("db/cmd/x", Category::Command);
            case.name = format!("case {i}");
            case.broken = i % 2 == 0;
            cases.push(case);
        }
        let mut reporter = quiet_reporter();
        let summary = runner.run_cases(cases, &mut reporter).await;
        assert_eq!(summary.total(), 20);
        assert_eq!(summary.failed, 10);
        assert_eq!(summary.broken, 10);
    }

    #[tokio::test]
    async fn run_documents_reports_parse_errors_and_filters() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad");
        let good = dir.path().join("good");
        std::fs::write(&bad, "NOPE=1\nRUN\n").unwrap();
        std::fs::write(&good, "NAME=keep\nCMDS=x\nRUN\nNAME=drop\nCMDS=x\nRUN\n").unwrap();
        let documents = vec![
            (bad, "db/cmd/bad".to_string()),
            (good, "db/cmd/good".to_string()),
        ];
        let options = RunOptions {
            filter: Some("keep".into()),
            list: false,
        };
        let mut reporter = quiet_reporter();
        let result = runner("/nonexistent/r2r-subject", None)
            .run_documents(&documents, &options, &mut reporter)
            .await;
        assert_eq!(result.errors, 1);
        assert_eq!(result.total.total(), 1);
        assert!(!result.success());
    }
}
