//! Command handlers behind the CLI.
//!
//! Each handler takes the shared [`App`] and returns the text to print, so
//! the same code paths run under tests with an in-memory database and a
//! scripted transport.

pub mod analytics;
pub mod auth;
pub mod cash;
pub mod diagnostics;
pub mod settings;

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiClient;
use crate::cli::{Cli, Commands};
use crate::config::{self, BackendConfig};
use crate::db::{self, DbState};
use crate::session::SessionStore;
use crate::storage::{self, DbStore, KeyValueStore};

/// Local-store category for drafts and lockout counters.
const LOCAL_CATEGORY: &str = "local";

pub const LOGIN_REQUIRED: &str =
    "Session expired or invalid. Sign in again with `backoffice-pos login <email>`.";

/// Everything a command needs, wired once per process.
pub struct App {
    pub db: Arc<DbState>,
    pub config: BackendConfig,
    pub session: Arc<SessionStore>,
    pub local: Arc<dyn KeyValueStore>,
    pub api: ApiClient,
    pub json: bool,
}

impl App {
    pub fn open(json: bool) -> anyhow::Result<Self> {
        let data_dir = config::data_dir();
        let db = Arc::new(
            db::init(&data_dir)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("opening database in {}", data_dir.display()))?,
        );
        let config = BackendConfig::load(&db);
        let session = Arc::new(SessionStore::new(storage::session_store_for(
            config.session_backend,
            db.clone(),
        )));
        session.load();
        let local: Arc<dyn KeyValueStore> = Arc::new(DbStore::new(db.clone(), LOCAL_CATEGORY));
        let api = ApiClient::from_config(&config, session.clone())?;
        Ok(Self {
            db,
            config,
            session,
            local,
            api,
            json,
        })
    }

    /// `value` as pretty JSON when `--json` was given, otherwise `text()`.
    pub fn render<T: Serialize>(
        &self,
        value: &T,
        text: impl FnOnce() -> String,
    ) -> anyhow::Result<String> {
        if self.json {
            Ok(serde_json::to_string_pretty(value)?)
        } else {
            Ok(text())
        }
    }
}

/// Token cancelled on Ctrl-C so an in-flight request stops promptly.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling request");
            trigger.cancel();
        }
    });
    token
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let app = App::open(cli.json)?;
    let result = run_command(&app, cli.command).await;
    if app.session.take_login_redirect() {
        eprintln!("{LOGIN_REQUIRED}");
    }
    let output = result?;
    if !output.is_empty() {
        println!("{}", output.trim_end());
    }
    Ok(())
}

pub async fn run_command(app: &App, command: Commands) -> anyhow::Result<String> {
    match command {
        Commands::Login { email, password } => auth::login(app, &email, password).await,
        Commands::Logout => auth::logout(app),
        Commands::Whoami => auth::whoami(app),
        Commands::Config { action } => settings::handle(app, action),
        Commands::Ping => diagnostics::ping(app).await,
        Commands::Report(args) => analytics::report(app, &args, Some(interrupt_token())).await,
        Commands::CompareDay { date } => {
            analytics::compare_day(app, date.as_deref(), Some(interrupt_token())).await
        }
        Commands::Cash { action } => cash::handle(app, action).await,
    }
}
