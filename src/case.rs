//! Test case records produced by the parser and expanders.

use crate::compare::Comparison;
use std::path::Path;
use std::time::{Duration, Instant};

/// Marker passed to the subject when a case has no target file.
pub const NO_FILE: &str = "-";

/// What kind of document a case came from, derived from its origin path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Generic `KEY=VALUE ... RUN` command cases.
    Command,
    /// Command cases that need the subject's plugins loaded.
    Extras,
    /// One-line assemble/decode round-trip cases.
    Asm,
    /// One-line commands checked for valid JSON output against sample files.
    Json,
    /// Load every file below `PATH=` and check the subject survives.
    Bin,
    /// Files from a fuzz directory, run with a hard timeout.
    Fuzz,
}

impl Category {
    /// Pick the category from the directory components of a document path,
    /// nearest directory first.
    pub fn from_origin(origin: &str) -> Self {
        let path = Path::new(origin);
        let dirs = path.parent().into_iter().flat_map(|p| p.components().rev());
        for component in dirs {
            match component.as_os_str().to_str() {
                Some("asm") => return Category::Asm,
                Some("json") => return Category::Json,
                Some("bin") => return Category::Bin,
                Some("extras") => return Category::Extras,
                _ => {}
            }
        }
        Category::Command
    }
}

/// How the subject is invoked for a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Safety flags, extra args, the command input and the target file.
    Commands,
    /// Open the target with analysis and quit.
    Load,
    /// Like `Load`, without safety flags and under the fuzz timeout.
    Fuzz,
}

/// Resolved per-case environment settings for the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecProfile {
    /// When false, plugin auto-loading is disabled through the environment.
    pub load_plugins: bool,
}

impl ExecProfile {
    pub fn resolve(category: Category, needs_plugins: &[String]) -> Self {
        Self {
            load_plugins: category == Category::Extras || !needs_plugins.is_empty(),
        }
    }
}

/// Assembler context passed to the subject as `-e` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsmSettings {
    pub arch: Option<String>,
    pub cpu: Option<String>,
    pub bits: Option<String>,
    pub big_endian: Option<bool>,
    pub offset: Option<String>,
}

impl AsmSettings {
    /// Subject arguments applying these settings.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut set = |key: &str, value: &str| {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        };
        if let Some(arch) = &self.arch {
            set("asm.arch", arch);
        }
        if let Some(cpu) = &self.cpu {
            set("asm.cpu", cpu);
        }
        if let Some(bits) = &self.bits {
            set("asm.bits", bits);
        }
        if let Some(big_endian) = self.big_endian {
            set("cfg.bigendian", if big_endian { "true" } else { "false" });
        }
        if let Some(offset) = &self.offset {
            args.push("-s".to_string());
            args.push(offset.clone());
        }
        args
    }
}

/// The literal form an expectation was written in.
///
/// Kept so a fix-it suggestion can be printed back in the same style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueStyle {
    Plain,
    Heredoc(String),
    Delimited(char),
    Base64,
    /// Produced by an expander; there is no directive to print back.
    Generated,
}

/// An expected value for one output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub text: String,
    pub style: ValueStyle,
}

impl Expectation {
    pub fn new(text: impl Into<String>, style: ValueStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// One concrete, executable unit bound to one invocation of the subject.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub origin: String,
    pub name: String,
    pub category: Category,
    pub invocation: Invocation,
    /// Raw command input, written to the scratch script in script mode.
    pub script: String,
    /// `script` trimmed and split on newlines, joined with `;` in inline mode.
    pub commands: Vec<String>,
    pub extra_args: Vec<String>,
    pub asm: AsmSettings,
    /// Target file; `None` passes [`NO_FILE`].
    pub file: Option<String>,
    /// Directory holding load targets (`PATH=`).
    pub path: Option<String>,
    pub expect: Option<Expectation>,
    pub expect_err: Option<Expectation>,
    pub comparison: Comparison,
    pub broken: bool,
    pub needs_plugins: Vec<String>,
    pub profile: ExecProfile,
}

impl TestCase {
    pub fn new(origin: &str, category: Category) -> Self {
        Self {
            origin: origin.to_string(),
            name: String::new(),
            category,
            invocation: match category {
                Category::Bin => Invocation::Load,
                Category::Fuzz => Invocation::Fuzz,
                _ => Invocation::Commands,
            },
            script: String::new(),
            commands: Vec::new(),
            extra_args: Vec::new(),
            asm: AsmSettings::default(),
            file: None,
            path: None,
            expect: None,
            expect_err: None,
            comparison: Comparison::Trimmed,
            broken: false,
            needs_plugins: Vec::new(),
            profile: ExecProfile::resolve(category, &[]),
        }
    }

    /// Set the command input and derive the command list from it.
    pub fn set_script(&mut self, script: String) {
        self.commands = split_commands(&script);
        self.script = script;
    }

    pub fn target(&self) -> &str {
        self.file.as_deref().unwrap_or(NO_FILE)
    }
}

/// Trim the multi-line command field and split it into one command per line.
pub fn split_commands(script: &str) -> Vec<String> {
    let trimmed = script.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('\n').map(str::to_string).collect()
}

/// Why a case finished without a normal subject exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abnormal {
    /// The subject, or the scratch script, could not be set up.
    Spawn(String),
    /// The fuzz timeout elapsed and the child was killed.
    Timeout(u64),
    /// A required capability was not reported by the subject; nothing ran.
    MissingCapability(String),
}

/// Runtime data captured while executing a case. Written once per case.
#[derive(Debug, Clone)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    pub started_at: Instant,
    pub ended_at: Instant,
    pub spawn_args: Vec<String>,
    pub abnormal: Option<Abnormal>,
}

impl Execution {
    pub fn lifetime(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }

    /// An execution where nothing was spawned.
    pub fn skipped(abnormal: Abnormal) -> Self {
        let now = Instant::now();
        Self {
            stdout: String::new(),
            stderr: String::new(),
            started_at: now,
            ended_at: now,
            spawn_args: Vec::new(),
            abnormal: Some(abnormal),
        }
    }
}

/// A case paired with the result of running it.
#[derive(Debug, Clone)]
pub struct Completed {
    pub case: TestCase,
    pub execution: Execution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_from_directory_components() {
        assert_eq!(Category::from_origin("db/asm/x86_32"), Category::Asm);
        assert_eq!(Category::from_origin("db/json/json"), Category::Json);
        assert_eq!(Category::from_origin("db/bin/elf"), Category::Bin);
        assert_eq!(Category::from_origin("db/extras/yara"), Category::Extras);
        assert_eq!(Category::from_origin("db/cmd/cmd_print"), Category::Command);
        // Only directories count, not the document name itself.
        assert_eq!(Category::from_origin("db/cmd/asm"), Category::Command);
        assert_eq!(Category::from_origin("x86_32"), Category::Command);
        assert_eq!(Category::from_origin("/home/bin/db/asm/arm_16"), Category::Asm);
    }

    #[test]
    fn split_commands_trims_and_splits() {
        assert_eq!(split_commands("?e hi\n"), vec!["?e hi"]);
        assert_eq!(split_commands("\n pd 1\npx 4\n\n"), vec!["pd 1", "px 4"]);
        assert!(split_commands("").is_empty());
        assert!(split_commands(" \n").is_empty());
    }

    #[test]
    fn asm_settings_args_order() {
        let settings = AsmSettings {
            arch: Some("arm".into()),
            cpu: Some("v7".into()),
            bits: Some("16".into()),
            big_endian: Some(true),
            offset: Some("0x100".into()),
        };
        assert_eq!(
            settings.to_args(),
            vec![
                "-e",
                "asm.arch=arm",
                "-e",
                "asm.cpu=v7",
                "-e",
                "asm.bits=16",
                "-e",
                "cfg.bigendian=true",
                "-s",
                "0x100"
            ]
        );
        assert!(AsmSettings::default().to_args().is_empty());
    }

    #[test]
    fn profile_loads_plugins_for_extras_or_needs() {
        assert!(!ExecProfile::resolve(Category::Command, &[]).load_plugins);
        assert!(ExecProfile::resolve(Category::Extras, &[]).load_plugins);
        assert!(ExecProfile::resolve(Category::Command, &["io_r2k".into()]).load_plugins);
    }

    #[test]
    fn new_case_invocation_follows_category() {
        assert_eq!(TestCase::new("o", Category::Bin).invocation, Invocation::Load);
        assert_eq!(TestCase::new("o", Category::Fuzz).invocation, Invocation::Fuzz);
        assert_eq!(TestCase::new("o", Category::Asm).invocation, Invocation::Commands);
        assert_eq!(TestCase::new("o", Category::Command).target(), NO_FILE);
    }
}
