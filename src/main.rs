use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use release_tools::cli::orchestration;
use release_tools::cli::{FetchTagPushArgs, NextTagArgs, ReleaseContext};
use release_tools::config;
use release_tools::release::ReleaseState;
use release_tools::ui;
use release_tools::ReleaseError;

#[derive(Parser)]
#[command(
    name = "release-tools",
    version,
    about = "Tag, validate and publish platform releases across the component repositories"
)]
struct Args {
    #[arg(short, long, global = true, help = "Custom configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log debug output")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the next tag of the pinned repository
    NextTag {
        #[arg(long, help = "Version constraint; defaults to the project's requirement")]
        constraint: Option<String>,
        #[arg(long, help = "Minimum stability; defaults to the project's minimum-stability")]
        minimum_stability: Option<String>,
        #[arg(long, help = "Bump the minor branch instead of the build number")]
        minor: bool,
    },
    /// Print the branch a tag should be released from
    MatchingBranch {
        tag: String,
        #[arg(long, default_value = "platform")]
        repo: PathBuf,
    },
    /// Print the release list entry of a tag
    ReleaseInfo { tag: String },
    /// Tag all repositories and push the release branch
    ReleaseTags { tag: String },
    /// Create or refresh the private release entry and upload archives
    PrepareRelease { tag: String },
    /// Make a prepared release public
    ReleasePackage { tag: String },
    /// Tag, validate and prepare a release in one run
    Release {
        tag: String,
        #[arg(short, long, help = "Skip confirmation prompts")]
        force: bool,
    },
    /// Tag a remote commit without a full clone and push the tag
    FetchTagPush {
        tag: String,
        #[arg(long, default_value = "HEAD")]
        commit: String,
        #[arg(long, default_value = "origin")]
        remote: String,
        #[arg(long)]
        url: Option<String>,
        #[arg(long, help = "Use an existing checkout instead of a temporary one")]
        repo: Option<PathBuf>,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long, help = "Configured repository to tag; fetches from its read_url")]
        repository: Option<String>,
    },
    /// Delete a tag in every managed repository
    DeleteTag {
        tag: String,
        #[arg(long, help = "Delete the tag on the release remote too")]
        remote: bool,
        #[arg(short, long, help = "Skip confirmation prompts")]
        force: bool,
    },
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(err) = run(args) {
        ui::display_error(&format!("{:#}", err));
        let precondition = err
            .downcast_ref::<ReleaseError>()
            .map(ReleaseError::is_precondition)
            .unwrap_or(false);
        std::process::exit(if precondition { 1 } else { 2 });
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> Result<()> {
    let mut config = config::load_config(args.config.as_deref()).context("Error loading config")?;
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    let ctx = ReleaseContext::new(config);

    match args.command {
        Command::NextTag {
            constraint,
            minimum_stability,
            minor,
        } => {
            let next = orchestration::next_tag(
                &ctx,
                &NextTagArgs {
                    constraint,
                    minimum_stability,
                    minor,
                },
            )?;
            println!("{}", next);
        }
        Command::MatchingBranch { tag, repo } => {
            println!("{}", orchestration::matching_branch(&ctx, &tag, &repo)?);
        }
        Command::ReleaseInfo { tag } => {
            let entry = orchestration::release_info(&ctx, &tag)?;
            println!("{}", ui::format_release(&entry));
        }
        Command::ReleaseTags { tag } => {
            let tagged = orchestration::release_tags(&ctx, &tag)?;
            ui::display_success(&ui::format_tagged(&tag, &tagged));
            ui::display_states(ReleaseState::ManifestValidated);
        }
        Command::PrepareRelease { tag } => {
            let entry = orchestration::prepare_release(&ctx, &tag)?;
            ui::display_success(&format!("Prepared release {}", tag));
            println!("{}", ui::format_release(&entry.to_json()));
        }
        Command::ReleasePackage { tag } => {
            orchestration::release_package(&ctx, &tag)?;
            ui::display_success(&format!("Released {}", tag));
        }
        Command::Release { tag, force } => {
            if !force && !ui::confirm_action(&format!("Tag and publish {}?", tag))? {
                println!("Release cancelled by user.");
                return Ok(());
            }
            let entry = orchestration::release(&ctx, &tag)?;
            ui::display_states(ReleaseState::Published);
            println!("{}", ui::format_release(&entry.to_json()));
        }
        Command::FetchTagPush {
            tag,
            commit,
            remote,
            url,
            repo,
            message,
            repository,
        } => {
            let args = FetchTagPushArgs {
                tag,
                commit,
                remote,
                url,
                repo,
                message,
                repository,
            };
            orchestration::fetch_tag_push(&ctx, &args)
                .with_context(|| format!("Failed to tag {} as {}", args.commit, args.tag))?;
            let target = args.repository.as_deref().unwrap_or(args.remote.as_str());
            ui::display_success(&format!("Pushed tag {} to {}", args.tag, target));
        }
        Command::DeleteTag { tag, remote, force } => {
            if !force && !ui::confirm_action(&format!("Delete tag {} in all repositories?", tag))? {
                println!("Operation cancelled by user.");
                return Ok(());
            }
            let deleted = orchestration::delete_tag(&ctx, &tag, remote)?;
            ui::display_status(&format!("Deleted {} in {} repositories", tag, deleted.len()));
        }
    }

    Ok(())
}
