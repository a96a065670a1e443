//! Command-line interface of the `girder` binary.

pub mod list;
pub mod progress;
pub mod upload;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use girder_client::config::{load_settings, Settings};
use girder_client::context::{AppContext, SessionHandle};
use girder_client::events::EventBus;
use girder_client::http::RestClient;

#[derive(Clone, Debug, Parser)]
#[command(name = "girder", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// API root, e.g. https://data.kitware.com/api/v1
    #[arg(long, global = true)]
    pub api_url: Option<String>,
    /// Authentication token sent as Girder-Token
    #[arg(long, global = true)]
    pub token: Option<String>,
    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Page through a listing endpoint
    #[command(alias = "ls", name = "list")]
    List(list::ListArg),
    /// Upload a local file
    #[command(alias = "up", name = "upload")]
    Upload(upload::UploadArg),
}

impl App {
    pub async fn run(self) -> Result<()> {
        let mut settings = load_settings().await;
        self.apply_to_settings(&mut settings);
        debug!("Using API at {}", settings.api_url);

        let session = SessionHandle::with_token(settings.token.clone());
        let client = RestClient::from_settings(&settings, session.clone())?;
        let ctx = AppContext::new(Arc::new(client), EventBus::new(), session);

        match self.cmd {
            Commands::List(arg) => list::run(ctx, &settings, arg).await,
            Commands::Upload(arg) => upload::run(ctx, &settings, arg).await,
        }
    }

    /// Flags win over config file and environment.
    fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref api_url) = self.api_url {
            settings.api_url = api_url.clone();
        }
        if let Some(ref token) = self.token {
            settings.token = Some(token.clone());
        }
        if let Some(timeout) = self.timeout {
            settings.request_timeout = timeout;
        }
    }
}
