//! Expanders turning one compact database line into several test cases.

use crate::case::{AsmSettings, Category, Expectation, TestCase, ValueStyle};
use crate::compare::Comparison;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// A `"quoted"` run or a run of non-space characters, glued together.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:"[^"]*"|[^"\s]+)+"#).expect("token regex is valid"));

const BROKEN_MARKER: &str = "BROKEN";

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("wrong test format {0:?} (expected TYPE ASM BYTES [OFFSET])")]
    Format(String),
    #[error("wrong file name {0:?} (expected arch, arch_bits or arch_cpu_bits)")]
    FileName(String),
    #[error("empty command in {0:?}")]
    EmptyCommand(String),
}

/// Expand an assemble/decode line into one case per requested direction.
///
/// The type code holds `d` (decode bytes to text) and `a` (assemble text to
/// bytes); `E` selects big endian and `B` marks every case as broken.
pub fn round_trip(origin: &str, line: &str) -> Result<Vec<TestCase>, ExpandError> {
    let tokens: Vec<&str> = TOKEN.find_iter(line).map(|m| m.as_str()).collect();
    if tokens.len() < 3 {
        return Err(ExpandError::Format(line.to_string()));
    }
    let quoted = |token: &str| token.starts_with('"');
    let (asm, bytes, offset) = if tokens.len() >= 4 && !quoted(tokens[1]) && quoted(tokens[2]) {
        (tokens[2], tokens[3], Some(tokens[1]))
    } else {
        (tokens[1], tokens[2], tokens.get(3).copied())
    };
    let asm = asm.replace('"', "");
    let kind = tokens[0];

    let file_name = Path::new(origin)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(origin);
    let settings = asm_settings(file_name, kind.contains('E'), offset.unwrap_or("0"))?;
    let broken = kind.contains('B');

    let mut cases = Vec::new();
    for direction in kind.chars() {
        let (name, script, expect) = match direction {
            'd' => (
                format!("{file_name}: {bytes} => \"{asm}\" (disassemble)"),
                format!("pad {bytes}\n"),
                asm.clone(),
            ),
            'a' => (
                format!("{file_name}: \"{asm}\" => {bytes} (assemble)"),
                format!("pa {asm}\n"),
                bytes.to_string(),
            ),
            _ => continue,
        };
        let mut case = TestCase::new(origin, Category::Asm);
        case.name = name;
        case.set_script(script);
        case.asm = settings.clone();
        case.expect = Some(Expectation::new(expect, ValueStyle::Generated));
        case.comparison = Comparison::Trimmed;
        case.broken = broken;
        cases.push(case);
    }
    Ok(cases)
}

/// Derive arch, cpu and bits from a document name like `arm_v7_16`.
fn asm_settings(
    file_name: &str,
    big_endian: bool,
    offset: &str,
) -> Result<AsmSettings, ExpandError> {
    let segments: Vec<&str> = file_name.split('_').collect();
    let (arch, cpu, bits) = match segments.as_slice() {
        [arch] => (*arch, None, None),
        [arch, bits] => (*arch, None, Some(*bits)),
        [arch, cpu, bits] => (*arch, Some(*cpu), Some(*bits)),
        _ => return Err(ExpandError::FileName(file_name.to_string())),
    };
    Ok(AsmSettings {
        arch: Some(arch.to_string()),
        cpu: cpu.map(str::to_string),
        bits: bits.map(str::to_string),
        big_endian: Some(big_endian),
        offset: Some(offset.to_string()),
    })
}

/// Expand a structural-output line into one case per sample file.
///
/// A trailing `BROKEN` token marks the cases as known-broken and is not part
/// of the command.
pub fn json_checks(
    origin: &str,
    line: &str,
    samples: &[String],
) -> Result<Vec<TestCase>, ExpandError> {
    let line = line.trim();
    let (command, broken) = match line.strip_suffix(BROKEN_MARKER) {
        Some(rest) if rest.is_empty() || rest.ends_with(char::is_whitespace) => {
            (rest.trim(), true)
        }
        _ => (line, false),
    };
    if command.is_empty() {
        return Err(ExpandError::EmptyCommand(line.to_string()));
    }
    Ok(samples
        .iter()
        .map(|sample| {
            let mut case = TestCase::new(origin, Category::Json);
            case.name = command.to_string();
            case.set_script(format!("{command}\n"));
            case.file = Some(sample.clone());
            case.comparison = Comparison::JsonValid;
            case.broken = broken;
            case
        })
        .collect())
}
