use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use media_compressor::app::App;
use media_compressor::batch::CancelFlag;
use media_compressor::image::{CompressionService, ImageCompressor};
use media_compressor::library::MediaLibrary;
use media_compressor::models::{CompressionPolicy, Config};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "media-compressor")]
#[command(about = "Recompress media library images and re-host external images")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recompress image files in place.
    Compress {
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },
    /// Import a file into the media library through the upload pipeline.
    Upload {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Print a token that authorizes one batch run.
    Token,
    /// Recompress every JPEG and PNG in the media library.
    Batch {
        #[arg(long)]
        token: Option<String>,
        /// Resume file; overrides BATCH_CHECKPOINT.
        #[arg(long, value_name = "FILE")]
        checkpoint: Option<PathBuf>,
    },
    /// Re-host external images referenced by an HTML file.
    Localize {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_compressor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    if let Err(e) = run(args.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Compress { paths } => compress_files(paths).await,
        Command::Upload { path } => {
            let app = App::new(Config::from_env()?).await?;
            let id = app.import_upload(&path).await?;
            let url = app.library().attachment_url(id).await?;
            println!("{}", url);
            Ok(())
        }
        Command::Token => {
            let app = App::new(Config::from_env()?).await?;
            println!("{}", app.issue_batch_token());
            Ok(())
        }
        Command::Batch { token, checkpoint } => {
            let mut config = Config::from_env()?;
            if checkpoint.is_some() {
                config.batch_checkpoint = checkpoint;
            }
            let app = App::new(config).await?;

            let cancel = CancelFlag::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, stopping after the current image");
                        cancel.cancel();
                    }
                }
            });

            let report = app.batch_compress_images(token.as_deref(), &cancel).await?;
            println!("{}", report.message());
            if report.cancelled {
                info!("Run the same command again to resume");
            }
            Ok(())
        }
        Command::Localize { input, output } => {
            let app = App::new(Config::from_env()?).await?;
            let content = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;

            let localized = app.save_content(content).await;
            match output {
                Some(path) => tokio::fs::write(&path, localized)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{}", localized),
            }
            Ok(())
        }
    }
}

/// Standalone encoder run; needs no site configuration.
async fn compress_files(paths: Vec<PathBuf>) -> Result<()> {
    let policy = match Config::from_env() {
        Ok(config) => config.policy,
        Err(_) => CompressionPolicy::default(),
    };
    let compressor = ImageCompressor::new(policy);

    for path in paths {
        match compressor.try_compress(&path).await {
            Ok(done) => println!(
                "{}: {} -> {} bytes",
                path.display(),
                done.original_size,
                done.compressed_size
            ),
            Err(e) => println!("{}: skipped ({})", path.display(), e),
        }
    }
    Ok(())
}
