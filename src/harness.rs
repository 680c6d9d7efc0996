//! Проверка эквивалентности исходника и сгенерированного артефакта.
//!
//! Для каждой фикстуры обе стороны запускаются отдельно, и их наблюдаемое
//! поведение (stdout и успех/отказ) сравнивается. Расхождение - это данные
//! отчёта, а не ошибка: ошибкой считается только невозможность получить
//! наблюдение (нет инструмента, таймаут, сбой ввода-вывода).

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wait_timeout::ChildExt;

use crate::ast::Ast;
use crate::compiler::driver_for_call;
use crate::error::TranspileError;
use crate::interpreter::Interpreter;
use crate::mapping::OperationMapping;
use crate::parser::{parse, parse_expr};
use crate::type_checker::{analyze, FunctionSignature};

/// Имя, под которым артефакт подключается к драйверу.
pub const SUBJECT_MODULE: &str = "subject";

/// Сценарий импорта модуля и печати результата вызова.
const PYTHON_CALL_DRIVER: &str = "\
import importlib.util, sys
spec = importlib.util.spec_from_file_location('subject', sys.argv[1])
module = importlib.util.module_from_spec(spec)
spec.loader.exec_module(module)
print(eval(sys.argv[2], vars(module)))
";

/// Ошибка проверки эквивалентности.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("'{tool}' is not available: {reason}")]
    ToolMissing { tool: String, reason: String },

    #[error("'{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("rustc failed to compile {path}:\n{stderr}")]
    Compile { path: String, stderr: String },

    #[error("program fixture requires an entry point, but the module has none")]
    MissingEntry,

    #[error("invalid fixture '{fixture}': {reason}")]
    Fixture { fixture: String, reason: String },

    #[error("pipeline failed: {0}")]
    Pipeline(#[from] TranspileError),

    #[error("invalid harness config: {0}")]
    Config(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Какой исполнитель представляет исходную сторону.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRunner {
    /// Внешний интерпретатор `python3`
    #[default]
    Python,
    /// Встроенный эталонный интерпретатор
    Reference,
}

/// Настройки проверки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub source_runner: SourceRunner,
    pub python: String,
    pub rustc: String,
    pub edition: String,
    /// Дополнительные флаги rustc
    pub rustc_flags: Vec<String>,
    /// Таймаут запуска программы, секунды
    pub timeout_secs: u64,
    /// Таймаут компиляции, секунды
    pub compile_timeout_secs: u64,
    /// Не удалять временные каталоги со сборками
    pub keep_artifacts: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source_runner: SourceRunner::Python,
            python: "python3".to_string(),
            rustc: "rustc".to_string(),
            edition: "2021".to_string(),
            rustc_flags: vec![
                "-C".to_string(),
                "overflow-checks=on".to_string(),
                "-A".to_string(),
                "warnings".to_string(),
            ],
            timeout_secs: 10,
            compile_timeout_secs: 120,
            keep_artifacts: false,
        }
    }
}

impl HarnessConfig {
    /// Загрузить настройки из JSON; отсутствующие поля берутся по умолчанию.
    pub fn from_json(json: &str) -> HarnessResult<Self> {
        serde_json::from_str(json).map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn temp_dir(&self) -> HarnessResult<tempfile::TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("pytr-")
            .disable_cleanup(self.keep_artifacts)
            .tempdir()?;
        if self.keep_artifacts {
            info!("Keeping build directory {}", dir.path().display());
        }
        Ok(dir)
    }
}

/// Фикстура: что именно запускается на обеих сторонах.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fixture {
    /// Запуск модуля как программы
    Program,
    /// Печать результата вызова, например `f([1, 2, 3])`
    Call(String),
}

impl Fixture {
    /// `program` или выражение вызова.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "program" => Fixture::Program,
            call => Fixture::Call(call.to_string()),
        }
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fixture::Program => write!(f, "<program>"),
            Fixture::Call(call) => write!(f, "{}", call),
        }
    }
}

/// Завершение запуска. Коды выхода нормализуются: любой ненулевой код
/// (исключение, паника) - `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// Наблюдаемое поведение одного запуска.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub stdout: String,
    pub outcome: Outcome,
}

impl Observation {
    fn new(stdout: &str, success: bool) -> Self {
        Self {
            stdout: stdout.replace("\r\n", "\n"),
            outcome: if success {
                Outcome::Success
            } else {
                Outcome::Failure
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Match,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub fixture: Fixture,
    pub status: Status,
    /// Описание расхождения
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Итог проверки по всем фикстурам.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub entries: Vec<ReportEntry>,
}

impl EquivalenceReport {
    pub fn all_match(&self) -> bool {
        self.entries.iter().all(|e| e.status == Status::Match)
    }

    pub fn mismatches(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == Status::Mismatch)
            .count()
    }
}

impl fmt::Display for EquivalenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let status = match entry.status {
                Status::Match => "MATCH",
                Status::Mismatch => "MISMATCH",
            };
            writeln!(f, "{:<9}{}", status, entry.fixture)?;
            if let Some(detail) = &entry.detail {
                writeln!(f, "         {}", detail)?;
            }
        }
        write!(
            f,
            "{} fixture(s), {} mismatch(es)",
            self.entries.len(),
            self.mismatches()
        )
    }
}

/// Сторона проверки: умеет получить наблюдение для фикстуры.
pub trait Executor {
    fn name(&self) -> &str;

    fn observe(&self, fixture: &Fixture) -> HarnessResult<Observation>;
}

/// Исходная сторона на встроенном интерпретаторе.
pub struct ReferenceExecutor {
    module: Ast,
}

impl ReferenceExecutor {
    pub fn new(source: &str) -> HarnessResult<Self> {
        Ok(Self {
            module: parse(source).map_err(TranspileError::from)?,
        })
    }
}

impl Executor for ReferenceExecutor {
    fn name(&self) -> &str {
        "reference"
    }

    fn observe(&self, fixture: &Fixture) -> HarnessResult<Observation> {
        let mut interpreter = Interpreter::new(&self.module);
        let result = match fixture {
            Fixture::Program => interpreter.run_main(),
            Fixture::Call(call) => {
                let (ast, expr) = parse_expr(call).map_err(|e| HarnessError::Fixture {
                    fixture: call.clone(),
                    reason: e.to_string(),
                })?;
                interpreter.import(SUBJECT_MODULE).and_then(|()| {
                    let value = interpreter.eval(&ast, expr)?;
                    interpreter.print_value(&value);
                    Ok(())
                })
            }
        };
        if let Err(e) = &result {
            debug!("reference run of {} failed: {}", fixture, e);
        }
        Ok(Observation::new(interpreter.output(), result.is_ok()))
    }
}

/// Исходная сторона во внешнем `python3`.
pub struct PythonExecutor {
    source_path: PathBuf,
    config: HarnessConfig,
}

impl PythonExecutor {
    pub fn new(source_path: impl Into<PathBuf>, config: HarnessConfig) -> Self {
        Self {
            source_path: source_path.into(),
            config,
        }
    }
}

impl Executor for PythonExecutor {
    fn name(&self) -> &str {
        "python"
    }

    fn observe(&self, fixture: &Fixture) -> HarnessResult<Observation> {
        let mut command = Command::new(&self.config.python);
        match fixture {
            Fixture::Program => {
                command.arg(&self.source_path);
            }
            Fixture::Call(call) => {
                command
                    .arg("-c")
                    .arg(PYTHON_CALL_DRIVER)
                    .arg(&self.source_path)
                    .arg(call);
            }
        }
        let run = run_process(&mut command, self.config.timeout())?;
        Ok(Observation::new(&run.stdout, run.success))
    }
}

/// Целевая сторона: артефакт на Rust, собранный `rustc`.
pub struct RustExecutor {
    artifact_path: PathBuf,
    /// Сигнатуры функций исходного модуля (для драйвера вызовов)
    functions: Vec<FunctionSignature>,
    has_entry: bool,
    mapping: OperationMapping,
    config: HarnessConfig,
}

impl RustExecutor {
    /// `source` - исходник, из которого получен артефакт: по нему
    /// типизируются вызовы фикстур.
    pub fn new(
        source: &str,
        artifact_path: impl Into<PathBuf>,
        mapping: OperationMapping,
        config: HarnessConfig,
    ) -> HarnessResult<Self> {
        let ast = parse(source).map_err(TranspileError::from)?;
        let typed = analyze(&ast)?;
        Ok(Self {
            artifact_path: artifact_path.into(),
            functions: typed.functions,
            has_entry: !typed.entry.is_empty(),
            mapping,
            config,
        })
    }

    fn compile(&self, dir: &Path, main_file: &Path) -> HarnessResult<PathBuf> {
        let binary = dir.join(format!("program{}", std::env::consts::EXE_SUFFIX));
        let mut command = Command::new(&self.config.rustc);
        command
            .arg("--edition")
            .arg(&self.config.edition)
            .args(&self.config.rustc_flags)
            .arg("-o")
            .arg(&binary)
            .arg(main_file);
        let run = run_process(
            &mut command,
            Duration::from_secs(self.config.compile_timeout_secs),
        )?;
        if !run.success {
            return Err(HarnessError::Compile {
                path: main_file.display().to_string(),
                stderr: run.stderr,
            });
        }
        Ok(binary)
    }
}

impl Executor for RustExecutor {
    fn name(&self) -> &str {
        "rust"
    }

    fn observe(&self, fixture: &Fixture) -> HarnessResult<Observation> {
        let dir = self.config.temp_dir()?;
        let artifact = dir.path().join("artifact.rs");
        fs::copy(&self.artifact_path, &artifact)?;

        let main_file = match fixture {
            Fixture::Program => {
                if !self.has_entry {
                    return Err(HarnessError::MissingEntry);
                }
                artifact
            }
            Fixture::Call(call) => {
                let driver = driver_for_call(
                    call,
                    &self.functions,
                    &self.mapping,
                    SUBJECT_MODULE,
                    "artifact.rs",
                )?;
                let path = dir.path().join("driver.rs");
                fs::write(&path, driver)?;
                path
            }
        };

        let binary = self.compile(dir.path(), &main_file)?;
        let run = run_process(&mut Command::new(&binary), self.config.timeout())?;
        Ok(Observation::new(&run.stdout, run.success))
    }
}

/// Результат внешнего процесса.
struct ProcessRun {
    success: bool,
    stdout: String,
    stderr: String,
}

fn run_process(command: &mut Command, timeout: Duration) -> HarnessResult<ProcessRun> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!("Running {:?}", command);
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => HarnessError::ToolMissing {
                tool: program.clone(),
                reason: e.to_string(),
            },
            _ => HarnessError::Io(e),
        })?;

    // Каналы читаются в отдельных потоках, иначе полный буфер блокирует процесс
    let stdout = child.stdout.take().map(read_in_background);
    let stderr = child.stderr.take().map(read_in_background);

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            warn!("'{}' exceeded {}s, killing", program, timeout.as_secs());
            let _ = child.kill();
            let _ = child.wait();
            return Err(HarnessError::Timeout {
                command: program,
                seconds: timeout.as_secs(),
            });
        }
    };

    let collect = |handle: Option<thread::JoinHandle<io::Result<String>>>| -> HarnessResult<String> {
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| HarnessError::Io(io::Error::other("pipe reader panicked")))?
                .map_err(HarnessError::Io),
            None => Ok(String::new()),
        }
    };
    Ok(ProcessRun {
        success: status.success(),
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
    })
}

fn read_in_background<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        pipe.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    })
}

/// Сравнить два исполнителя на всех фикстурах.
pub fn check_equivalence(
    source: &dyn Executor,
    target: &dyn Executor,
    fixtures: &[Fixture],
) -> HarnessResult<EquivalenceReport> {
    let mut report = EquivalenceReport::default();
    for fixture in fixtures {
        let expected = source.observe(fixture)?;
        let actual = target.observe(fixture)?;
        let detail = describe_difference(source.name(), &expected, target.name(), &actual);
        let status = if detail.is_none() {
            Status::Match
        } else {
            Status::Mismatch
        };
        info!("{:?}: {}", status, fixture);
        report.entries.push(ReportEntry {
            fixture: fixture.clone(),
            status,
            detail,
        });
    }
    Ok(report)
}

fn describe_difference(
    source_name: &str,
    expected: &Observation,
    target_name: &str,
    actual: &Observation,
) -> Option<String> {
    if expected.outcome != actual.outcome {
        Some(format!(
            "outcome differs: {} {:?}, {} {:?}",
            source_name, expected.outcome, target_name, actual.outcome
        ))
    } else if expected.stdout != actual.stdout {
        Some(format!(
            "stdout differs: {} {:?}, {} {:?}",
            source_name, expected.stdout, target_name, actual.stdout
        ))
    } else {
        None
    }
}

/// Проверить исходный файл и артефакт на фикстурах. Исходная сторона
/// выбирается настройкой `source_runner`.
pub fn check_files(
    source_path: &Path,
    artifact_path: &Path,
    fixtures: &[Fixture],
    mapping: &OperationMapping,
    config: &HarnessConfig,
) -> HarnessResult<EquivalenceReport> {
    let source = fs::read_to_string(source_path)?;
    let target = RustExecutor::new(&source, artifact_path, mapping.clone(), config.clone())?;
    let report = match config.source_runner {
        SourceRunner::Python => {
            let python = PythonExecutor::new(source_path, config.clone());
            check_equivalence(&python, &target, fixtures)?
        }
        SourceRunner::Reference => {
            let reference = ReferenceExecutor::new(&source)?;
            check_equivalence(&reference, &target, fixtures)?
        }
    };
    info!(
        "{}: {} fixture(s), {} mismatch(es)",
        source_path.display(),
        report.entries.len(),
        report.mismatches()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::transpile;

    const PROCESS_LIST: &str = "\
def process_list(items):
    \"\"\"Append two markers, reverse and pop.\"\"\"
    if len(items) == 0:
        return None
    items.append(42)
    items.append(99)
    size = len(items)
    items.reverse()
    first = items.pop()
    return first
";

    const MY_LEN: &str = "\
def my_len(x):
    return len(x)

if __name__ == \"__main__\":
    result = my_len([1, 2, 3, 4, 5])
    assert result == 5
    print(f\"len = {result}\")
";

    /// Исполнитель с заранее заданным наблюдением.
    struct Fixed(Observation);

    impl Executor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn observe(&self, _fixture: &Fixture) -> HarnessResult<Observation> {
            Ok(self.0.clone())
        }
    }

    fn tool_available(tool: &str) -> bool {
        Command::new(tool)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_reference_observes_calls() {
        let reference = ReferenceExecutor::new(PROCESS_LIST).unwrap();
        let empty = reference
            .observe(&Fixture::parse("process_list([])"))
            .unwrap();
        assert_eq!(empty, Observation::new("None\n", true));
        let full = reference
            .observe(&Fixture::parse("process_list([1, 2, 3])"))
            .unwrap();
        assert_eq!(full, Observation::new("1\n", true));
    }

    #[test]
    fn test_reference_program_failure_keeps_output() {
        let reference = ReferenceExecutor::new("print(1)\nassert False\n").unwrap();
        let observation = reference.observe(&Fixture::Program).unwrap();
        assert_eq!(observation.stdout, "1\n");
        assert_eq!(observation.outcome, Outcome::Failure);
    }

    #[test]
    fn test_mismatch_is_data_not_error() {
        let a = Fixed(Observation::new("1\n", true));
        let b = Fixed(Observation::new("2\n", true));
        let c = Fixed(Observation::new("1\n", false));
        let fixtures = [Fixture::Program];

        let report = check_equivalence(&a, &a, &fixtures).unwrap();
        assert!(report.all_match());

        let report = check_equivalence(&a, &b, &fixtures).unwrap();
        assert_eq!(report.mismatches(), 1);
        assert!(report.entries[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("stdout differs"));

        let report = check_equivalence(&a, &c, &fixtures).unwrap();
        assert!(report.entries[0]
            .detail
            .as_deref()
            .unwrap()
            .starts_with("outcome differs"));
        assert!(report.to_string().contains("MISMATCH <program>"));
    }

    #[test]
    fn test_bad_fixture_is_error() {
        let reference = ReferenceExecutor::new(PROCESS_LIST).unwrap();
        let err = reference
            .observe(&Fixture::Call("process_list(".to_string()))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Fixture { .. }));
    }

    #[test]
    fn test_config_defaults_and_file() {
        let config = HarnessConfig::default();
        assert_eq!(config.python, "python3");
        assert!(config.rustc_flags.contains(&"overflow-checks=on".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        fs::write(&path, r#"{ "timeout_secs": 3, "source_runner": "reference" }"#).unwrap();
        let config = HarnessConfig::from_file(&path).unwrap();
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.source_runner, SourceRunner::Reference);
        assert_eq!(config.rustc, "rustc");

        assert!(matches!(
            HarnessConfig::from_json("{ \"timeout_secs\": \"x\" }"),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let config = HarnessConfig {
            python: "pytr-no-such-python".to_string(),
            ..HarnessConfig::default()
        };
        let python = PythonExecutor::new("missing.py", config);
        let err = python.observe(&Fixture::Program).unwrap_err();
        assert!(matches!(err, HarnessError::ToolMissing { .. }));
    }

    #[test]
    fn test_python_agrees_with_reference() {
        if !tool_available("python3") {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process_list.py");
        fs::write(&path, PROCESS_LIST).unwrap();

        let python = PythonExecutor::new(&path, HarnessConfig::default());
        let reference = ReferenceExecutor::new(PROCESS_LIST).unwrap();
        let fixtures = [
            Fixture::parse("process_list([])"),
            Fixture::parse("process_list([1, 2, 3])"),
        ];
        let report = check_equivalence(&python, &reference, &fixtures).unwrap();
        assert!(report.all_match(), "{}", report);
    }

    /// Транспилировать `source`, собрать rustc и сверить с эталоном.
    fn assert_round_trip(name: &str, source: &str, fixtures: &[Fixture]) {
        let mapping = OperationMapping::rust().unwrap();
        let config = HarnessConfig {
            source_runner: SourceRunner::Reference,
            ..HarnessConfig::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join(format!("{}.py", name));
        let artifact_path = dir.path().join(format!("{}.rs", name));
        fs::write(&source_path, source).unwrap();
        fs::write(&artifact_path, transpile(source, &mapping).unwrap()).unwrap();

        let report = check_files(&source_path, &artifact_path, fixtures, &mapping, &config).unwrap();
        assert!(report.all_match(), "{}: {}", name, report);
    }

    #[test]
    fn test_round_trip_against_rustc() {
        if !tool_available("rustc") {
            eprintln!("rustc not found, skipping");
            return;
        }
        assert_round_trip(
            "process_list",
            PROCESS_LIST,
            &[
                Fixture::parse("process_list([])"),
                Fixture::parse("process_list([1, 2, 3])"),
            ],
        );
        assert_round_trip(
            "my_len",
            MY_LEN,
            &[Fixture::Program, Fixture::parse("my_len([1, 2, 3, 4, 5])")],
        );
    }

    #[test]
    fn test_round_trip_receiver_mutated_by_argument() {
        if !tool_available("rustc") {
            return;
        }
        let source = "\
def cycle(xs: list[int]) -> int:
    xs.append(xs.pop())
    return len(xs)

def rotate(xs: list[int]) -> int:
    xs.append(xs.pop())
    xs.reverse()
    return xs.pop()

def show(xs: list[int]) -> int:
    print(f\"{xs} {xs.pop()}\", xs)
    return len(xs)
";
        let reference = ReferenceExecutor::new(source).unwrap();
        let cycled = reference.observe(&Fixture::parse("cycle([1, 2])")).unwrap();
        assert_eq!(cycled, Observation::new("2\n", true));
        let shown = reference.observe(&Fixture::parse("show([1, 2])")).unwrap();
        assert_eq!(shown, Observation::new("[1, 2] 2 [1]\n1\n", true));

        assert_round_trip(
            "evaluation_order",
            source,
            &[
                Fixture::parse("cycle([1, 2])"),
                Fixture::parse("rotate([1, 2, 3])"),
                Fixture::parse("show([1, 2])"),
            ],
        );
    }

    #[test]
    fn test_round_trip_assert_message_runs_on_failure_only() {
        if !tool_available("rustc") {
            return;
        }
        let source = "\
def checked(xs: list[int]) -> int:
    assert len(xs) > 0, f\"{xs.pop()}\"
    return len(xs)
";
        let reference = ReferenceExecutor::new(source).unwrap();
        let kept = reference.observe(&Fixture::parse("checked([1, 2, 3])")).unwrap();
        assert_eq!(kept, Observation::new("3\n", true));

        assert_round_trip(
            "lazy_assert",
            source,
            &[
                Fixture::parse("checked([1, 2, 3])"),
                Fixture::parse("checked([])"),
            ],
        );
    }

    #[test]
    fn test_round_trip_list_properties() {
        if !tool_available("rustc") {
            return;
        }
        let source = "\
def pop_empty(xs: list[int]) -> int:
    return xs.pop()

def len_after_reverse(xs: list[int]) -> int:
    xs.reverse()
    return len(xs)

def push_then_pop(xs: list[int], v: int) -> int:
    n = len(xs)
    xs.append(v)
    top = xs.pop()
    assert len(xs) == n
    return top

def find_last(xs: list[int], target: int):
    if len(xs) == 0:
        return None
    last = xs.pop()
    if last == target:
        return last
    return None

def push(xs: list[int]):
    xs.append(1)

def refill(n: int) -> int:
    items = [n]
    push(items)
    items = [n, n]
    return len(items)
";
        let reference = ReferenceExecutor::new(source).unwrap();
        let empty = reference.observe(&Fixture::parse("pop_empty([])")).unwrap();
        assert_eq!(empty.outcome, Outcome::Failure);

        assert_round_trip(
            "list_properties",
            source,
            &[
                Fixture::parse("pop_empty([])"),
                Fixture::parse("pop_empty([4])"),
                Fixture::parse("len_after_reverse([1, 2, 3])"),
                Fixture::parse("len_after_reverse([])"),
                Fixture::parse("push_then_pop([1, 2], 7)"),
                Fixture::parse("push_then_pop([], 5)"),
                Fixture::parse("find_last([], 1)"),
                Fixture::parse("find_last([1, 2], 2)"),
                Fixture::parse("find_last([1, 2], 1)"),
                Fixture::parse("refill(3)"),
            ],
        );
    }

    #[test]
    fn test_build_directory_cleanup_follows_config() {
        let keep = HarnessConfig {
            keep_artifacts: true,
            ..HarnessConfig::default()
        };
        let dir = keep.temp_dir().unwrap();
        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(path.exists());
        fs::remove_dir_all(&path).unwrap();

        let dir = HarnessConfig::default().temp_dir().unwrap();
        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_program_fixture_without_entry() {
        if !tool_available("rustc") {
            return;
        }
        let mapping = OperationMapping::rust().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("artifact.rs");
        fs::write(&artifact_path, transpile(PROCESS_LIST, &mapping).unwrap()).unwrap();
        let rust =
            RustExecutor::new(PROCESS_LIST, &artifact_path, mapping, HarnessConfig::default())
                .unwrap();
        assert!(matches!(
            rust.observe(&Fixture::Program),
            Err(HarnessError::MissingEntry)
        ));
    }
}
