//! Command-line surface for the GroupMe archiver.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use gma_core::{
    archive::{Archiver, LOG_FILE},
    config::Config,
    domain::GroupId,
    formatting::safe_name,
    listing,
    ports::ChatApi,
};
use gma_groupme::{ClientConfig, GroupMeClient};
use gma_media::ImageDownloader;

#[derive(Parser)]
#[command(
    name = "gma",
    about = "Archive GroupMe group chats into flat delimited files",
    version
)]
struct Cli {
    /// GroupMe access token (falls back to GROUPME_ACCESS_TOKEN or token.txt).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Show debug logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all groups and their creation timestamps.
    ListGroups {
        /// File to save the listing.
        #[arg(long, default_value = "archives/groups_list.txt")]
        output: PathBuf,
    },

    /// Archive all messages from one group.
    Archive {
        /// Id of the group to archive. Omit to print the group list instead.
        #[arg(long)]
        group_id: Option<String>,

        /// Directory for the archive files. Defaults to
        /// <archive-root>/<name>_<id>.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Download the images referenced by an existing archive.
    DownloadImages {
        /// Archive directory, as produced by `archive`.
        archive_dir: PathBuf,

        /// Path to the archived message log. Defaults to the log inside
        /// the archive directory.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Directory for the downloaded files. Defaults to the archive
        /// directory itself.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    gma_core::logging::init(cli.verbose);

    let cfg = Config::load()?;

    match cli.command {
        Command::ListGroups { output } => {
            let client = client(&cfg, cli.token)?;
            let summaries = listing::group_summaries(&client).await?;

            for s in &summaries {
                println!("{}  {}  {}", s.id.0, s.name, s.created_at);
            }
            listing::write_group_listing(&output, &summaries)?;
            println!("Exported {} groups to {}", summaries.len(), output.display());
        }

        Command::Archive {
            group_id: None,
            ..
        } => {
            let client = client(&cfg, cli.token)?;
            println!("Select a group id to archive:");
            for s in listing::group_summaries(&client).await? {
                println!("  {}  {}", s.id.0, s.name);
            }
        }

        Command::Archive {
            group_id: Some(group_id),
            output_dir,
        } => {
            let client = client(&cfg, cli.token)?;
            let group_id = GroupId(group_id);

            let output_dir = match output_dir {
                Some(dir) => dir,
                None => {
                    let group = client.get_group(&group_id).await?;
                    cfg.archive_root
                        .join(format!("{}_{}", safe_name(&group.name), group_id.0))
                }
            };

            match Archiver::new(&client)
                .archive_group(&group_id, &output_dir)
                .await
            {
                Ok(summary) => {
                    println!(
                        "Archived {} messages from {} authors of \"{}\" into {}",
                        summary.messages,
                        summary.authors,
                        summary.group.name,
                        output_dir.display()
                    );
                }
                Err(aborted) => {
                    anyhow::bail!(
                        "archive failed after {} messages: {}",
                        aborted.processed,
                        aborted.source
                    );
                }
            }
        }

        Command::DownloadImages {
            archive_dir,
            csv,
            output_dir,
        } => {
            let csv_path = csv.unwrap_or_else(|| archive_dir.join(LOG_FILE));
            let output_dir = output_dir.unwrap_or_else(|| archive_dir.clone());
            let prefix = archive_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "images".to_string());

            let downloader = ImageDownloader::new(cfg.http_timeout);
            let report = downloader
                .download_all(&csv_path, &output_dir, &prefix)
                .await?;
            println!(
                "Images done: {} downloaded, {} skipped, {} failed",
                report.downloaded, report.skipped, report.failed
            );
        }
    }

    Ok(())
}

/// Build the API client from config + the optional `--token` flag.
fn client(cfg: &Config, token_flag: Option<String>) -> anyhow::Result<GroupMeClient> {
    let token = cfg.resolve_token(token_flag)?;
    Ok(GroupMeClient::new(
        token,
        ClientConfig {
            base_url: cfg.api_base.clone(),
            page_size: cfg.page_size,
            page_delay: cfg.page_delay,
            max_retries: cfg.max_retries,
            retry_backoff: cfg.retry_backoff,
            http_timeout: cfg.http_timeout,
        },
    ))
}
