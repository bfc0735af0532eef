//! Subject process execution.
//!
//! Builds the argument vector for a case, runs the subject and captures its
//! output and lifetime. Admission through the [`Limiter`](crate::limiter::Limiter)
//! is the caller's job.

use crate::case::{Abnormal, ExecProfile, Execution, Invocation, TestCase};
use crate::compare::normalize_newlines;
use crate::config::SuiteConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

/// Flags disabling color, interactivity and UTF-8 decoration in the subject.
pub const SAFETY_FLAGS: [&str; 5] = [
    "-escr.utf8=0",
    "-escr.color=0",
    "-escr.interactive=0",
    "-N",
    "-Q",
];

/// Open the target with analysis, print a marker and quit.
const LOAD_FLAGS: [&str; 4] = ["-c", "?e init", "-qcq", "-A"];

/// Where the command input goes on the subject's command line.
#[derive(Debug, Clone, Copy)]
pub enum CommandInput<'a> {
    /// `-i <path>` to a script file holding the raw command input.
    Script(&'a Path),
    /// `-c <commands joined by ;>`.
    Inline,
}

/// Runs cases against one subject executable.
#[derive(Debug, Clone)]
pub struct Executor {
    subject: String,
    use_script: bool,
    fuzz_timeout: Duration,
    plugin_env: Vec<String>,
    root: Option<PathBuf>,
}

impl Executor {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            subject: config.subject.clone(),
            use_script: config.use_script,
            fuzz_timeout: config.fuzz_timeout(),
            plugin_env: config.plugin_env.clone(),
            root: config.root.clone(),
        }
    }

    /// Run one case to completion. Never fails; problems are recorded in
    /// [`Execution::abnormal`].
    pub async fn execute(&self, case: &TestCase) -> Execution {
        for capability in &case.needs_plugins {
            if !self.probe(capability).await {
                debug!(
                    origin = %case.origin,
                    name = %case.name,
                    capability = %capability,
                    "required capability missing, skipping"
                );
                return Execution::skipped(Abnormal::MissingCapability(capability.clone()));
            }
        }

        match case.invocation {
            Invocation::Commands => self.run_commands(case).await,
            Invocation::Load => {
                let mut args = self.preamble(case);
                args.extend(LOAD_FLAGS.map(String::from));
                args.push(self.resolve_target(case.target()));
                self.spawn(args, case.profile, None).await
            }
            Invocation::Fuzz => {
                let mut args: Vec<String> = LOAD_FLAGS.map(String::from).to_vec();
                args.push(self.resolve_target(case.target()));
                self.spawn(args, case.profile, Some(self.fuzz_timeout)).await
            }
        }
    }

    /// Ask the subject whether it provides `capability`.
    ///
    /// Runs one short-lived process per call; results are not cached.
    pub async fn probe(&self, capability: &str) -> bool {
        let args = vec![
            "-N".to_string(),
            "-Q".to_string(),
            "-qc".to_string(),
            format!("L~{capability}"),
            "-".to_string(),
        ];
        let profile = ExecProfile { load_plugins: true };
        let execution = self.spawn(args, profile, None).await;
        execution.abnormal.is_none()
            && execution
                .stdout
                .split_whitespace()
                .any(|token| token == capability)
    }

    async fn run_commands(&self, case: &TestCase) -> Execution {
        if !self.use_script {
            let args = self.command_args(case, CommandInput::Inline);
            return self.spawn(args, case.profile, None).await;
        }

        let script = match write_script(&case.script).await {
            Ok(script) => script,
            Err(e) => {
                let mut execution = Execution::skipped(Abnormal::Spawn(format!(
                    "failed to create script file: {e}"
                )));
                execution.spawn_args = self.preamble(case);
                return execution;
            }
        };
        let args = self.command_args(case, CommandInput::Script(script.path()));
        let execution = self.spawn(args, case.profile, None).await;
        if let Err(e) = script.close() {
            debug!(error = %e, "failed to remove script file");
        }
        execution
    }

    /// Full argument vector for a command case.
    pub fn command_args(&self, case: &TestCase, input: CommandInput) -> Vec<String> {
        let mut args = self.preamble(case);
        match input {
            CommandInput::Script(path) => {
                args.push("-i".to_string());
                args.push(path.display().to_string());
            }
            CommandInput::Inline => {
                args.push("-c".to_string());
                args.push(case.commands.join(";"));
            }
        }
        args.push(self.resolve_target(case.target()));
        args
    }

    fn preamble(&self, case: &TestCase) -> Vec<String> {
        let mut args: Vec<String> = SAFETY_FLAGS.map(String::from).to_vec();
        args.extend(case.asm.to_args());
        args.extend(case.extra_args.iter().cloned());
        args
    }

    /// Targets starting with `.` are relative to the suite root.
    fn resolve_target(&self, target: &str) -> String {
        match &self.root {
            Some(root) if target.starts_with('.') => root.join(target).display().to_string(),
            _ => target.to_string(),
        }
    }

    async fn spawn(
        &self,
        args: Vec<String>,
        profile: ExecProfile,
        timeout: Option<Duration>,
    ) -> Execution {
        let mut command = Command::new(&self.subject);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &self.plugin_env {
            if profile.load_plugins {
                command.env_remove(var);
            } else {
                command.env(var, "1");
            }
        }

        debug!(subject = %self.subject, ?args, "spawning subject");
        let started_at = Instant::now();
        let finished = |stdout: String, stderr: String, abnormal: Option<Abnormal>| Execution {
            stdout,
            stderr,
            started_at,
            ended_at: Instant::now(),
            spawn_args: args.clone(),
            abnormal,
        };

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "failed to spawn subject");
                let reason = format!("failed to spawn {}: {e}", self.subject);
                return finished(String::new(), String::new(), Some(Abnormal::Spawn(reason)));
            }
        };

        let output = child.wait_with_output();
        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(output) => output,
                Err(_) => {
                    // Dropping the wait future kills the child.
                    let abnormal = Abnormal::Timeout(limit.as_secs());
                    return finished(String::new(), String::new(), Some(abnormal));
                }
            },
            None => output.await,
        };

        match output {
            Ok(output) => finished(
                normalize_newlines(&String::from_utf8_lossy(&output.stdout)),
                normalize_newlines(&String::from_utf8_lossy(&output.stderr)),
                None,
            ),
            Err(e) => {
                let reason = format!("failed to read subject output: {e}");
                finished(String::new(), String::new(), Some(Abnormal::Spawn(reason)))
            }
        }
    }
}

async fn write_script(script: &str) -> std::io::Result<NamedTempFile> {
    let file = tokio::task::spawn_blocking(|| {
        tempfile::Builder::new()
            .prefix("r2r-")
            .suffix(".r2")
            .tempfile()
    })
    .await
    .map_err(std::io::Error::other)??;
    tokio::fs::write(file.path(), script).await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::Category;

    fn executor(subject: &str) -> Executor {
        let config = SuiteConfig {
            subject: subject.to_string(),
            ..SuiteConfig::default()
        };
        Executor::new(&config)
    }

    fn command_case(script: &str) -> TestCase {
        let mut case = TestCase::new("db/cmd/x", Category::Command);
        case.name = "x".into();
        case.set_script(script.to_string());
        case
    }

    #[test]
    fn inline_args() {
        let mut case = command_case("?e a\n?e b\n");
        case.extra_args = vec!["-b".into(), "32".into()];
        case.file = Some("bins/elf/ls".into());

        let args = executor("radare2").command_args(&case, CommandInput::Inline);
        let mut expected: Vec<String> = SAFETY_FLAGS.map(String::from).to_vec();
        expected.extend(["-b", "32", "-c", "?e a;?e b", "bins/elf/ls"].map(String::from));
        assert_eq!(args, expected);
    }

    #[test]
    fn script_args_use_stdin_marker_without_file() {
        let case = command_case("pd 1\n");
        let args = executor("radare2").command_args(&case, CommandInput::Script(Path::new("/tmp/s.r2")));
        let tail: Vec<&str> = args[SAFETY_FLAGS.len()..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["-i", "/tmp/s.r2", "-"]);
    }

    #[test]
    fn asm_settings_precede_extra_args() {
        let mut case = command_case("pad 90\n");
        case.asm.arch = Some("x86".into());
        case.extra_args = vec!["-v".into()];
        let args = executor("radare2").command_args(&case, CommandInput::Inline);
        let tail: Vec<&str> = args[SAFETY_FLAGS.len()..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["-e", "asm.arch=x86", "-v", "-c", "pad 90", "-"]);
    }

    #[test]
    fn dot_targets_resolve_against_root() {
        let config = SuiteConfig {
            root: Some(PathBuf::from("/suite")),
            ..SuiteConfig::default()
        };
        let executor = Executor::new(&config);
        assert_eq!(executor.resolve_target("./bins/a"), "/suite/./bins/a");
        assert_eq!(executor.resolve_target("bins/a"), "bins/a");
        assert_eq!(executor.resolve_target("-"), "-");
    }

    #[tokio::test]
    async fn spawn_failure_is_recorded_not_raised() {
        let case = command_case("?e hi\n");
        let execution = executor("/nonexistent/r2r-subject").execute(&case).await;
        assert!(matches!(execution.abnormal, Some(Abnormal::Spawn(_))));
        assert!(execution.stdout.is_empty());
        assert!(execution.spawn_args.iter().any(|a| a == "-i"));
    }

    #[tokio::test]
    async fn missing_capability_skips_execution() {
        let mut case = command_case("?e hi\n");
        case.needs_plugins = vec!["io_nope".into()];
        let execution = executor("/nonexistent/r2r-subject").execute(&case).await;
        assert_eq!(
            execution.abnormal,
            Some(Abnormal::MissingCapability("io_nope".into()))
        );
        assert!(execution.spawn_args.is_empty());
    }

    #[cfg(unix)]
    mod fake_subject {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_subject(dir: &Path, body: &str) -> String {
            let path = dir.join("subject.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        #[tokio::test]
        async fn captures_both_streams() {
            let dir = tempfile::tempdir().unwrap();
            let subject = write_subject(dir.path(), "echo out; echo err >&2; echo more");
            let execution = executor(&subject).execute(&command_case("x\n")).await;
            assert_eq!(execution.abnormal, None);
            assert_eq!(execution.stdout, "out\nmore\n");
            assert_eq!(execution.stderr, "err\n");
            assert!(execution.ended_at >= execution.started_at);
        }

        #[tokio::test]
        async fn script_file_is_removed_after_exit() {
            let dir = tempfile::tempdir().unwrap();
            // Print the script path given after -i, and its contents.
            let subject = write_subject(
                dir.path(),
                r#"while [ $# -gt 0 ]; do if [ "$1" = "-i" ]; then echo "$2"; cat "$2"; fi; shift; done"#,
            );
            let execution = executor(&subject).execute(&command_case("?e hi\n")).await;
            let mut lines = execution.stdout.lines();
            let script_path = lines.next().unwrap().to_string();
            assert_eq!(lines.next(), Some("?e hi"));
            assert!(!Path::new(&script_path).exists());
        }

        #[tokio::test]
        async fn plugin_env_follows_profile() {
            let dir = tempfile::tempdir().unwrap();
            let subject = write_subject(dir.path(), "echo \"${R2_NOPLUGINS:-unset}\"");
            let executor = executor(&subject);

            let case = command_case("x\n");
            assert_eq!(executor.execute(&case).await.stdout, "1\n");

            let mut case = command_case("x\n");
            case.profile.load_plugins = true;
            assert_eq!(executor.execute(&case).await.stdout, "unset\n");
        }

        #[tokio::test]
        async fn probe_reports_listed_capability() {
            let dir = tempfile::tempdir().unwrap();
            let subject = write_subject(dir.path(), "echo \"io_present  core_x\"");
            let executor = executor(&subject);
            assert!(executor.probe("io_present").await);
            assert!(!executor.probe("io_pres").await);
        }

        #[tokio::test]
        async fn fuzz_timeout_kills_child() {
            let dir = tempfile::tempdir().unwrap();
            let subject = write_subject(dir.path(), "sleep 5");
            let config = SuiteConfig {
                subject,
                ..SuiteConfig::default()
            };
            let mut executor = Executor::new(&config);
            executor.fuzz_timeout = Duration::from_millis(200);

            let mut case = TestCase::new("fuzz", Category::Fuzz);
            case.file = Some("crash.bin".into());
            let execution = executor.execute(&case).await;
            assert_eq!(execution.abnormal, Some(Abnormal::Timeout(0)));
            assert!(execution.lifetime() < Duration::from_secs(4));
            assert_eq!(execution.spawn_args.last().map(String::as_str), Some("crash.bin"));
        }
    }
}
