use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crucible_common::types::{ExecutionRequest, Language, TestCase};
use crucible_engine::{run_tests, ContainerRegistry, EngineConfig, ExecutionMode, Executor};

/// Execute one source file and print its streams.
pub async fn run(
    file: &Path,
    language: Option<&str>,
    stdin_file: Option<&Path>,
    config: Option<&Path>,
    persistent: bool,
) -> Result<()> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let language = resolve_language(language, file)?;
    let stdin = match stdin_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let executor = build_executor(config, persistent)?;
    let mut request = ExecutionRequest::new(code, language);
    request.stdin = stdin;

    let result = executor.execute(&request).await?;

    println!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    println!();
    println!("→ finished in {}ms", result.elapsed_ms);
    Ok(())
}

/// Judge one source file against a JSON test case file.
pub async fn judge(
    file: &Path,
    cases_file: &Path,
    language: Option<&str>,
    config: Option<&Path>,
    persistent: bool,
) -> Result<()> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let language = resolve_language(language, file)?;
    let cases_json = fs::read_to_string(cases_file)
        .with_context(|| format!("failed to read {}", cases_file.display()))?;
    let cases: Vec<TestCase> =
        serde_json::from_str(&cases_json).context("malformed test case file")?;

    let executor = build_executor(config, persistent)?;
    let summary = run_tests(&executor, &code, language, &cases).await?;

    for result in &summary.results {
        let mark = if result.passed { "✓" } else { "✗" };
        match &result.error {
            Some(error) => println!("  {} case {}: error: {}", mark, result.index + 1, error),
            None => println!("  {} case {}", mark, result.index + 1),
        }
    }
    println!();
    println!("→ {}/{} test cases passed", summary.passed, summary.total);

    if summary.passed < summary.total {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the supported languages with their configured images.
pub fn languages(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    for lang in Language::ALL {
        println!("  {:<12} {}", lang.to_string(), config.image_for(lang));
    }
    Ok(())
}

fn build_executor(config: Option<&Path>, persistent: bool) -> Result<Executor> {
    let config = load_config(config)?;
    let mode = if persistent {
        ExecutionMode::Persistent
    } else {
        ExecutionMode::Ephemeral
    };
    Executor::new(config, ContainerRegistry::default(), mode)
        .context("failed to connect to the docker daemon")
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::load_or_default()),
    }
}

/// Explicit flag wins; otherwise the file extension decides.
fn resolve_language(flag: Option<&str>, file: &Path) -> Result<Language> {
    if let Some(name) = flag {
        return Ok(name.parse()?);
    }
    let Some(ext) = file.extension().and_then(|e| e.to_str()) else {
        bail!(
            "cannot infer language for {}; pass --language",
            file.display()
        );
    };
    match ext {
        "py" => Ok(Language::Python),
        "js" | "mjs" => Ok(Language::Javascript),
        "java" => Ok(Language::Java),
        "cpp" | "cc" | "cxx" => Ok(Language::Cpp),
        other => bail!("unrecognized source extension '.{other}'; pass --language"),
    }
}
