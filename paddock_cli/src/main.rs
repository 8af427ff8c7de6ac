use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use paddock_core::{
    PaddockConfig, Pipeline, PolicyLoader, PolicyResolver, RequestContext, Response,
    RoutePolicies, Stage,
};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "paddock", version, about = "Inspect and exercise route policies")]
struct Cli {
    #[command(flatten)]
    source: Source,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct Source {
    /// Config file; defaults to the nearest Paddock.toml, if any
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Policy directory, overriding the config
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Default stage, overriding the config
    #[arg(long, global = true)]
    default_stage: Option<Stage>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List loaded policies by stage
    Inspect,

    /// Print the per-stage plan of a route declaration
    Plan {
        /// Declaration as JSON, e.g. '[["isLoggedIn", "isAnAdmin"], "addAnalytics"]'
        #[arg(long)]
        policies: String,
    },

    /// Run a simulated request through the pipeline
    Check {
        #[arg(long)]
        policies: String,

        #[arg(long, default_value = "/")]
        path: String,

        /// Query parameter as key=value; repeatable
        #[arg(long = "query", value_name = "KEY=VALUE")]
        queries: Vec<String>,

        /// Header as name:value; repeatable
        #[arg(long = "header", value_name = "NAME:VALUE")]
        headers: Vec<String>,

        /// Credentials as JSON
        #[arg(long)]
        credentials: Option<String>,
    },
}

impl Source {
    fn config(&self) -> Result<PaddockConfig> {
        let mut config = match &self.config {
            Some(path) => PaddockConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => PaddockConfig::from_project_root().unwrap_or_else(|e| {
                debug!("{}, using defaults", e);
                PaddockConfig::default()
            }),
        };
        if let Some(dir) = &self.dir {
            config.policy_directory = dir.clone();
        }
        if let Some(stage) = self.default_stage {
            config.default_stage = stage;
        }
        Ok(config)
    }

    fn pipeline(&self) -> Result<Pipeline> {
        let config = self.config()?;
        let pipeline = Pipeline::load(&config, &PolicyLoader::default())
            .with_context(|| format!("Failed to load policies from {}", config.policy_dir().display()))?;
        Ok(pipeline)
    }
}

fn inspect(pipeline: &Pipeline) -> String {
    let registry = pipeline.registry();
    let mut out = String::new();
    for stage in Stage::ALL {
        let names = registry.policies_at(stage);
        if names.is_empty() {
            continue;
        }
        out.push_str(&format!("{}:\n", stage));
        for name in names {
            out.push_str(&format!("  {}\n", name));
        }
    }
    if out.is_empty() {
        out.push_str("No policies loaded.\n");
    }
    out
}

fn plan(pipeline: &Pipeline, declared: &RoutePolicies) -> Result<String> {
    let plans = PolicyResolver::new(pipeline.registry()).resolve_all(declared)?;
    let mut out = String::new();
    for (stage, plan) in plans {
        let marker = if pipeline.is_intercepting(stage) {
            ""
        } else {
            " (not intercepted)"
        };
        out.push_str(&format!("{}{}: {}\n", stage, marker, plan.labels().join(" -> ")));
    }
    if out.is_empty() {
        out.push_str("Nothing to run.\n");
    }
    Ok(out)
}

fn split_pair(raw: &str, sep: char) -> Result<(&str, &str)> {
    raw.split_once(sep)
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| anyhow!("Expected '{}' in '{}'", sep, raw))
}

fn build_request(
    path: &str,
    queries: &[String],
    headers: &[String],
    credentials: Option<&str>,
    declared: RoutePolicies,
) -> Result<RequestContext> {
    let mut request = RequestContext::get(path).with_policies(declared);
    for raw in queries {
        let (key, value) = split_pair(raw, '=')?;
        request = request.with_query(key, value);
    }
    for raw in headers {
        let (name, value) = split_pair(raw, ':')?;
        request = request.with_header(name, value);
    }
    if let Some(raw) = credentials {
        let credentials: Value = serde_json::from_str(raw).context("Invalid JSON for --credentials")?;
        request = request.with_credentials(credentials);
    }
    Ok(request)
}

async fn check(pipeline: &Pipeline, request: RequestContext) -> Response {
    pipeline
        .handle(request, |request| async move {
            json!({ "handler": "handler", "path": request.path() })
        })
        .await
}

fn render(response: &Response) -> String {
    let mut out = format!("{}\n", response.status);
    if let Some(location) = &response.location {
        out.push_str(&format!("Location: {}\n", location));
    }
    if !response.body.is_null() {
        out.push_str(&format!("{:#}\n", response.body));
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let pipeline = cli.source.pipeline()?;
    info!(policies = pipeline.registry().len(), "Pipeline ready");

    match cli.command {
        Commands::Inspect => print!("{}", inspect(&pipeline)),
        Commands::Plan { policies } => {
            let declared = RoutePolicies::from_json(&policies)?;
            print!("{}", plan(&pipeline, &declared)?);
        }
        Commands::Check {
            policies,
            path,
            queries,
            headers,
            credentials,
        } => {
            let declared = RoutePolicies::from_json(&policies)?;
            let request = build_request(&path, &queries, &headers, credentials.as_deref(), declared)?;
            let response = check(&pipeline, request).await;
            print!("{}", render(&response));
            if !response.status.is_success() {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::fs;
    use tempfile::tempdir;

    fn pipeline_for(dir: &std::path::Path) -> Pipeline {
        fs::write(
            dir.join("isLoggedIn.toml"),
            "kind = \"require-query\"\nkey = \"loggedin\"\nvalue = \"true\"\n",
        )
        .unwrap();
        fs::write(
            dir.join("addAnalytics.toml"),
            "kind = \"annotate-response\"\nfield = \"analytics\"\nvalue = \"tracked\"\n",
        )
        .unwrap();

        let source = Source {
            config: None,
            dir: Some(dir.to_path_buf()),
            default_stage: None,
        };
        source.pipeline().unwrap()
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "paddock",
            "--dir",
            "policies",
            "check",
            "--policies",
            "[\"isLoggedIn\"]",
            "--query",
            "loggedin=true",
        ])
        .unwrap();
        assert_eq!(cli.source.dir, Some(PathBuf::from("policies")));
        assert!(matches!(cli.command, Commands::Check { ref queries, .. } if queries == &["loggedin=true"]));

        let cli = Cli::try_parse_from(["paddock", "inspect", "--default-stage", "onPostAuth"]).unwrap();
        assert_eq!(cli.source.default_stage, Some(Stage::PostAuth));
        assert!(Cli::try_parse_from(["paddock", "inspect", "--default-stage", "never"]).is_err());
    }

    #[test]
    fn test_inspect_and_plan() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline_for(temp_dir.path());

        assert_eq!(
            inspect(&pipeline),
            "pre-handler:\n  isLoggedIn\npost-handler:\n  addAnalytics\n"
        );

        let declared = RoutePolicies::from_json(r#"["isLoggedIn", "addAnalytics"]"#).unwrap();
        assert_eq!(
            plan(&pipeline, &declared).unwrap(),
            "pre-handler: isLoggedIn\npost-handler: addAnalytics\n"
        );

        let missing = RoutePolicies::from_json(r#"["nope"]"#).unwrap();
        assert!(plan(&pipeline, &missing).is_err());
    }

    #[tokio::test]
    async fn test_check() {
        let temp_dir = tempdir().unwrap();
        let pipeline = pipeline_for(temp_dir.path());
        let declared = RoutePolicies::from_json(r#"["isLoggedIn", "addAnalytics"]"#).unwrap();

        let request = build_request(
            "/loggedin",
            &["loggedin=true".to_string()],
            &[],
            None,
            declared.clone(),
        )
        .unwrap();
        let response = check(&pipeline, request).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["analytics"], "tracked");

        let request = build_request("/loggedin", &[], &[], None, declared).unwrap();
        let response = check(&pipeline, request).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert!(render(&response).starts_with("403 Forbidden\n"));
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair(" loggedin = true ", '=').unwrap(), ("loggedin", "true"));
        assert_eq!(split_pair("x-api-key: a:b", ':').unwrap(), ("x-api-key", "a:b"));
        assert!(split_pair("loggedin", '=').is_err());
    }

    #[test]
    fn test_build_request_rejects_bad_pairs() {
        assert!(build_request("/", &["novalue".to_string()], &[], None, RoutePolicies::new()).is_err());
        assert!(build_request("/", &[], &[], Some("{not json"), RoutePolicies::new()).is_err());
    }
}
