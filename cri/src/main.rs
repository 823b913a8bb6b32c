//! Stevedore CRI - image pull binary.
//!
//! Runs CRI PullImage against the configured registries and local image
//! store, printing the resulting image reference.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stevedore_core::PullConfig;
use stevedore_cri::cri_api::{AuthConfig, PullImageRequest};
use stevedore_cri::{ImagePullService, PullContext};
use stevedore_runtime::{ImageServer, OciImageServer};

/// Stevedore CRI image puller
#[derive(Parser, Debug)]
#[command(name = "stevedore-cri", about = "Stevedore CRI image puller")]
struct Args {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for storing pulled OCI images (overrides the config file).
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull an image unless the local copy is already current.
    Pull {
        /// Image reference (e.g., "alpine:latest", "ghcr.io/org/image:tag")
        image: String,

        /// Registry username
        #[arg(short, long, default_value = "")]
        username: String,

        /// Registry password
        #[arg(short, long, default_value = "")]
        password: String,

        /// Base64 of "username:password"; overrides --username/--password
        #[arg(long, default_value = "")]
        auth: String,

        /// Give up after this many seconds (overrides the config file)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the locally stored record for an image.
    Status {
        /// Image reference, ID, or repo digest
        image: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PullConfig::load(path)?,
        None => PullConfig::default(),
    };
    if let Some(dir) = args.store_dir {
        config.store_dir = dir;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let server = Arc::new(OciImageServer::from_config(&config)?);

    tracing::debug!(
        store_dir = %config.resolved_store_dir().display(),
        search_registries = ?config.search_registries,
        "Image store opened"
    );

    match args.command {
        Command::Pull {
            image,
            username,
            password,
            auth,
            timeout,
        } => {
            let mut ctx = PullContext::background();
            if let Some(secs) = timeout.or(config.pull_timeout_secs) {
                ctx = ctx.with_timeout(Duration::from_secs(secs));
            }

            let request = PullImageRequest::for_image(image).with_auth(AuthConfig {
                username,
                password,
                auth,
                ..Default::default()
            });

            let service = ImagePullService::new(server);
            let response = service.pull_image(&ctx, request).await?;
            println!("{}", response.image_ref);
        }
        Command::Status { image } => {
            let store = server.store();
            let mut keys = vec![image.clone()];
            if let Ok(names) = server.resolve_names(&image).await {
                keys.extend(names);
            }

            for key in &keys {
                if let Some(stored) = store.status(key).await? {
                    println!("{}", serde_json::to_string_pretty(&stored)?);
                    return Ok(());
                }
            }
            return Err(format!("Image not found: {}", image).into());
        }
    }

    Ok(())
}
