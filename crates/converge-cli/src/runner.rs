use std::path::{Path, PathBuf};

use converge_core::{AgentConfig, ConvergeError, Policy, Result};
use converge_eval::{EvaluationContext, HandlerRegistry, OutputSink, RunReport, Scheduler};
use tracing::{debug, info};

use crate::args::Cli;

pub async fn run(cli: Cli) -> Result<()> {
    let policies = expand_globs(cli.policies.clone())?;
    if policies.is_empty() {
        return Err(ConvergeError::PolicyError {
            message: "no policy documents found".into(),
        });
    }

    let policy = load_policies(&policies).await?;
    let mut config = load_config(cli.config.as_deref(), &policies)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let report = execute(policy, &config, OutputSink::stdout()).await?;
    info!(
        "Run finished: {} bundle(s), {} pass(es), {} promise(s) kept, {} not kept",
        report.bundles, report.passes, report.kept, report.not_kept
    );
    debug!(
        "Dispatched {} instance(s), {} in the background",
        report.dispatched, report.backgrounded
    );
    Ok(())
}

pub async fn execute(policy: Policy, config: &AgentConfig, output: OutputSink) -> Result<RunReport> {
    let mut ctx = EvaluationContext::from_config(config).with_output(output);
    let scheduler = Scheduler::new(policy, HandlerRegistry::with_builtins(), config.agent.clone());
    scheduler.run(&mut ctx).await
}

async fn load_policies(paths: &[PathBuf]) -> Result<Policy> {
    let mut merged = Policy::default();
    for path in paths {
        debug!("Loading policy {}", path.display());
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConvergeError::IoError {
                path: path.to_string_lossy().to_string(),
                message: e.to_string(),
            })?;
        let policy = Policy::from_json(&source).map_err(|e| ConvergeError::PolicyError {
            message: format!("{}: {}", path.display(), e),
        })?;
        merged.merge(policy);
    }
    Ok(merged)
}

/// An explicit path wins; otherwise the nearest `converge.toml` above the
/// first policy document, falling back to defaults.
fn load_config(explicit: Option<&Path>, policies: &[PathBuf]) -> Result<AgentConfig> {
    if let Some(path) = explicit {
        return AgentConfig::load(path);
    }

    let start = policies
        .first()
        .and_then(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok());

    match start.and_then(|dir| AgentConfig::find(&dir)) {
        Some(path) => {
            debug!("Using configuration {}", path.display());
            AgentConfig::load(&path)
        }
        None => Ok(AgentConfig::default()),
    }
}

fn apply_overrides(config: &mut AgentConfig, cli: &Cli) {
    if !cli.bundlesequence.is_empty() {
        config.agent.bundlesequence = Some(cli.bundlesequence.clone());
    }
    config.agent.define.extend(cli.define.iter().cloned());
    config.agent.negate.extend(cli.negate.iter().cloned());
    if let Some(passes) = cli.max_passes {
        config.agent.max_passes = passes;
    }
    if let Some(jobs) = cli.jobs {
        config.agent.max_children = jobs;
    }
}

fn expand_globs(patterns: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut result = vec![];

    for pattern in patterns {
        let pattern_str = pattern.to_string_lossy();

        if pattern_str.contains('*') || pattern_str.contains('?') {
            for entry in glob::glob(&pattern_str).map_err(|e| ConvergeError::GlobError {
                message: e.to_string(),
            })? {
                match entry {
                    Ok(path) => result.push(path),
                    Err(e) => {
                        return Err(ConvergeError::GlobError {
                            message: e.to_string(),
                        })
                    }
                }
            }
        } else {
            result.push(pattern);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const POLICY: &str = r#"{
        "control": { "bundlesequence": ["main"] },
        "bundles": [
            {
                "name": "main",
                "promise_types": {
                    "vars": [
                        { "promiser": "hosts", "constraints": [{ "lval": "slist", "rval": ["web", "db"] }] }
                    ],
                    "reports": [
                        { "promiser": "host $(hosts)" },
                        { "promiser": "production", "classes": "production" }
                    ]
                }
            }
        ]
    }"#;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("converge-cli-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_execute_policy() {
        let policy = Policy::from_json(POLICY).unwrap();
        let output = OutputSink::capture();
        let report = execute(policy, &AgentConfig::default(), output.clone()).await.unwrap();
        assert_eq!(output.lines(), vec!["R: host web", "R: host db"]);
        assert_eq!(report.bundles, 1);
    }

    #[tokio::test]
    async fn test_define_override_reaches_classes() {
        let cli = Cli::try_parse_from(["converge", "p.json", "-D", "production"]).unwrap();
        let mut config = AgentConfig::default();
        apply_overrides(&mut config, &cli);

        let output = OutputSink::capture();
        execute(Policy::from_json(POLICY).unwrap(), &config, output.clone())
            .await
            .unwrap();
        assert_eq!(output.lines().last().map(String::as_str), Some("R: production"));
    }

    #[tokio::test]
    async fn test_load_and_merge_policies() {
        let dir = temp_dir("merge");
        let first = dir.join("a.json");
        let second = dir.join("b.json");
        std::fs::write(&first, POLICY).unwrap();
        std::fs::write(&second, r#"{ "bundles": [ { "name": "extra" } ] }"#).unwrap();

        let policy = load_policies(&[first, second]).await.unwrap();
        assert!(policy.bundle("main").is_some());
        assert!(policy.bundle("extra").is_some());
    }

    #[tokio::test]
    async fn test_invalid_policy_names_the_file() {
        let dir = temp_dir("invalid");
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = load_policies(&[path]).await.unwrap_err();
        assert!(matches!(err, ConvergeError::PolicyError { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_config_discovered_next_to_policy() {
        let dir = temp_dir("config");
        std::fs::write(dir.join("converge.toml"), "[agent]\nmax_passes = 5\n").unwrap();
        let nested = dir.join("policies");
        std::fs::create_dir_all(&nested).unwrap();

        let config = load_config(None, &[nested.join("site.json")]).unwrap();
        assert_eq!(config.agent.max_passes, 5);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from(["converge", "p.json", "-b", "web", "-j", "3", "--max-passes", "1"]).unwrap();
        let mut config = AgentConfig::from_toml("[agent]\nmax_passes = 4\nbundlesequence = [\"main\"]\n").unwrap();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.agent.bundlesequence, Some(vec!["web".to_string()]));
        assert_eq!(config.agent.max_children, 3);
        assert_eq!(config.agent.max_passes, 1);
    }

    #[test]
    fn test_expand_globs() {
        let dir = temp_dir("globs");
        std::fs::write(dir.join("one.json"), "{}").unwrap();
        std::fs::write(dir.join("two.json"), "{}").unwrap();
        std::fs::write(dir.join("notes.txt"), "").unwrap();

        let pattern = dir.join("*.json");
        let mut found = expand_globs(vec![pattern]).unwrap();
        found.sort();
        assert_eq!(found, vec![dir.join("one.json"), dir.join("two.json")]);

        let literal = PathBuf::from("missing.json");
        assert_eq!(expand_globs(vec![literal.clone()]).unwrap(), vec![literal]);
    }
}
