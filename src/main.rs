use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use workshed::git::SystemGit;
use workshed::workspace::{
    ApplyOptions, ApplyOutcome, CaptureRequest, CreateOptions, ExecOptions, ExportOptions,
    ImportOptions, ListFilter, Workshed, WorkshedConfig, WorkshedError, WorkspaceContext,
};

#[derive(Parser)]
#[command(name = "workshed", version, about = "Multi-repository workspaces")]
struct Cli {
    /// Root directory (default: $WORKSHED_ROOT or ~/.workshed)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workspace and clone its repositories
    Create {
        #[arg(long, short)]
        purpose: String,
        /// Repository spec (host/org/repo[@ref], git@host:org/repo[@ref], ./path)
        #[arg(long = "repo", short)]
        repos: Vec<String>,
        #[arg(long)]
        template: Option<PathBuf>,
        /// Template variable, key=value
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    /// List workspaces
    List {
        #[arg(long)]
        purpose: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Show one workspace
    Show { handle: String },
    /// Print the workspace directory
    Path { handle: String },
    /// Delete a workspace and its clones
    Remove { handle: String },
    /// Change the purpose of a workspace
    Purpose { handle: String, purpose: String },
    /// Add or remove repositories
    #[command(subcommand)]
    Repo(RepoCommand),
    /// Capture the git state of every repository
    Capture(CaptureArgs),
    /// List captures
    Captures { handle: String },
    /// Restore a capture
    Apply {
        handle: String,
        capture: String,
        /// Only run the preflight checks
        #[arg(long)]
        dry_run: bool,
        /// Skip the automatic pre-apply capture
        #[arg(long)]
        no_checkpoint: bool,
    },
    /// Run a command in every (or one) repository
    Exec {
        handle: String,
        #[arg(long = "repo", short)]
        target: Option<String>,
        #[arg(long)]
        parallel: bool,
        /// Deadline in seconds for the whole batch
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// List execution records
    Executions {
        handle: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one execution record
    Execution { handle: String, id: String },
    /// Export the workspace context as JSON
    Export {
        handle: String,
        #[arg(long)]
        compact: bool,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Create a workspace from an exported context
    Import {
        file: PathBuf,
        #[arg(long)]
        preserve_handle: bool,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum RepoCommand {
    Add { handle: String, spec: String },
    Remove { handle: String, name: String },
}

#[derive(Args)]
struct CaptureArgs {
    handle: String,
    #[arg(long, short)]
    name: Option<String>,
    #[arg(long, short)]
    description: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Custom metadata, key=value
    #[arg(long = "meta")]
    custom: Vec<String>,
}

fn parse_pairs(pairs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|p| match p.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => bail!("expected key=value, got {:?}", p),
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = match &cli.root {
        Some(root) => WorkshedConfig::load(root)?,
        None => WorkshedConfig::load_default()?,
    };
    let git = SystemGit::discover()?;
    let engine = Workshed::new(config, Arc::new(git));
    let cwd = std::env::current_dir().context("cannot read current directory")?;

    match cli.command {
        Commands::Create {
            purpose,
            repos,
            template,
            vars,
        } => {
            let ws = engine
                .create(CreateOptions {
                    purpose,
                    repositories: repos,
                    invocation_dir: cwd,
                    template,
                    template_vars: parse_pairs(&vars)?.into_iter().collect::<HashMap<_, _>>(),
                })
                .await?;
            if cli.json {
                print_json(&ws)?;
            } else {
                println!("{}", ws.handle);
            }
        }
        Commands::List { purpose, repo } => {
            let filter = ListFilter {
                purpose,
                repository: repo,
            };
            let items = engine.list(&filter)?;
            if cli.json {
                print_json(&items)?;
            } else {
                for ws in items {
                    println!("{}\t{}\t{} repos", ws.handle, ws.purpose, ws.repositories.len());
                }
            }
        }
        Commands::Show { handle } => {
            let ws = engine.get(&handle)?;
            if cli.json {
                print_json(&ws)?;
            } else {
                println!("{} - {}", ws.handle, ws.purpose);
                println!("path: {}", ws.path.display());
                for repo in &ws.repositories {
                    match repo.reference.as_str() {
                        "" => println!("  {}\t{}", repo.name, repo.url),
                        r => println!("  {}\t{}@{}", repo.name, repo.url, r),
                    }
                }
            }
        }
        Commands::Path { handle } => println!("{}", engine.path(&handle)?.display()),
        Commands::Remove { handle } => engine.remove(&handle).await?,
        Commands::Purpose { handle, purpose } => {
            engine.update_purpose(&handle, &purpose).await?;
        }
        Commands::Repo(RepoCommand::Add { handle, spec }) => {
            let repo = engine.add_repository(&handle, &spec, &cwd).await?;
            println!("{}", repo.name);
        }
        Commands::Repo(RepoCommand::Remove { handle, name }) => {
            engine.remove_repository(&handle, &name).await?;
        }
        Commands::Capture(args) => {
            let request = CaptureRequest {
                name: args.name.unwrap_or_default(),
                description: args.description.unwrap_or_default(),
                tags: args.tags,
                custom: parse_pairs(&args.custom)?.into_iter().collect::<BTreeMap<_, _>>(),
                ..Default::default()
            };
            let capture = engine.capture_state(&args.handle, request).await?;
            if cli.json {
                print_json(&capture)?;
            } else {
                println!("{}", capture.id);
                for r in &capture.git_state {
                    let state = match (&r.error, r.dirty) {
                        (Some(e), _) => format!("error: {}", e),
                        (None, true) => "dirty".to_string(),
                        (None, false) => "clean".to_string(),
                    };
                    println!("  {}\t{}\t{}\t{}", r.repository, r.branch, r.commit, state);
                }
            }
        }
        Commands::Captures { handle } => {
            let captures = engine.list_captures(&handle)?;
            if cli.json {
                print_json(&captures)?;
            } else {
                for c in captures {
                    println!(
                        "{}\t{}\t{}\t{}",
                        c.id,
                        c.timestamp.to_rfc3339(),
                        c.kind.as_str(),
                        c.name
                    );
                }
            }
        }
        Commands::Apply {
            handle,
            capture,
            dry_run,
            no_checkpoint,
        } => {
            if dry_run {
                let result = engine.preflight_apply(&handle, &capture).await?;
                if cli.json {
                    print_json(&result)?;
                } else if result.valid {
                    println!("ok: capture can be applied");
                } else {
                    for e in &result.errors {
                        println!("{}\t{}\t{}", e.repository, e.reason, e.details);
                    }
                }
                return Ok(if result.valid { 0 } else { 1 });
            }

            let opts = ApplyOptions {
                checkpoint: !no_checkpoint,
            };
            let report = engine.apply_capture(&handle, &capture, opts).await?;
            if cli.json {
                print_json(&report)?;
            } else {
                for r in &report.repositories {
                    match &r.error {
                        Some(e) => println!("{}\tfailed\t{}", r.repository, e),
                        None => println!("{}\t{}", r.repository, r.checked_out),
                    }
                }
                if let Some(checkpoint) = &report.checkpoint {
                    println!("checkpoint: {}", checkpoint);
                }
            }
            return Ok(match report.outcome {
                ApplyOutcome::Completed => 0,
                ApplyOutcome::PartiallyFailed => 1,
            });
        }
        Commands::Exec {
            handle,
            target,
            parallel,
            timeout,
            command,
        } => {
            let opts = ExecOptions {
                command,
                target,
                parallel: parallel || engine.config().exec.parallel,
                timeout: timeout
                    .map(Duration::from_secs)
                    .or_else(|| engine.config().exec_timeout()),
            };
            let ctrl_c = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let outcome = engine.exec_until(&handle, opts, ctrl_c).await?;
            if cli.json {
                print_json(&outcome.record)?;
            } else {
                for r in &outcome.results {
                    let status = match (&r.error, r.exit_code) {
                        (Some(e), _) => e.to_string(),
                        (None, Some(code)) => format!("exit {}", code),
                        (None, None) => "no exit code".to_string(),
                    };
                    println!("==> {} ({}, {} ms)", r.repository, status, r.duration_ms);
                    print!("{}", r.output);
                }
            }
            return Ok(outcome.record.exit_code);
        }
        Commands::Executions { handle, limit } => {
            let records = engine.list_executions(&handle, limit)?;
            if cli.json {
                print_json(&records)?;
            } else {
                for r in records {
                    println!(
                        "{}\t{}\texit {}\t{}",
                        r.id,
                        r.started_at.to_rfc3339(),
                        r.exit_code,
                        r.command.join(" ")
                    );
                }
            }
        }
        Commands::Execution { handle, id } => print_json(&engine.get_execution(&handle, &id)?)?,
        Commands::Export {
            handle,
            compact,
            output,
        } => {
            let context = engine.export_context(&handle, ExportOptions { compact })?;
            let json = context.to_json()?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .with_context(|| format!("cannot write {}", path.display()))?,
                None => println!("{}", json),
            }
        }
        Commands::Import {
            file,
            preserve_handle,
            force,
        } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let ws = engine
                .import_context(ImportOptions {
                    context: WorkspaceContext::from_json(&json)?,
                    preserve_handle,
                    force,
                    invocation_dir: cwd,
                })
                .await?;
            if cli.json {
                print_json(&ws)?;
            } else {
                println!("{}", ws.handle);
            }
        }
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    workshed::util::init_logging("warn");

    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<WorkshedError>() {
                Some(err) => {
                    eprintln!("error[{}]: {}", err.code(), err);
                    if let Some(hint) = err.hint() {
                        eprintln!("hint: {}", hint);
                    }
                }
                None => eprintln!("error: {:#}", e),
            }
            1
        }
    };
    std::process::exit(code);
}
