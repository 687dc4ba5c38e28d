use anyhow::anyhow;
use serde_json::json;

use super::App;
use crate::api::OriginKind;
use crate::cli::ConfigAction;
use crate::config::{self, BackendConfig};
use crate::table::{Column, Table};

pub fn handle(app: &App, action: ConfigAction) -> anyhow::Result<String> {
    let (key, value) = match action {
        ConfigAction::Show => return show(app),
        ConfigAction::Reset => {
            config::reset_backend_settings(&app.db).map_err(|e| anyhow!(e))?;
            return Ok("Backend settings reset to defaults.".to_string());
        }
        ConfigAction::SetDeployed { url } => ("deployed_url".to_string(), url),
        ConfigAction::SetLocals { origins } => ("local_origins".to_string(), origins.join(",")),
        ConfigAction::SetHostname { hostname } => ("hostname".to_string(), hostname),
        ConfigAction::Set { key, value } => (key, value),
    };

    config::set_backend_setting(&app.db, &key, &value).map_err(|e| anyhow!(e))?;
    Ok(format!("Saved {key}. Takes effect on the next command."))
}

fn show(app: &App) -> anyhow::Result<String> {
    // Re-read so a setting saved earlier in this process is reflected.
    let config = BackendConfig::load(&app.db);
    let environment = config.environment();
    let origins = config.origins();

    app.render(
        &json!({ "config": config, "environment": environment, "origins": origins }),
        || {
            let mut out = format!(
                "Hostname:    {}\nEnvironment: {:?}\nSessions:    {:?}\n\n",
                config.hostname, environment, config.session_backend
            );
            let mut table = Table::new(vec![
                Column::right("#"),
                Column::left("Origin"),
                Column::left("Kind"),
                Column::right("Timeout"),
            ]);
            for (i, origin) in origins.iter().enumerate() {
                let timeout = match origin.kind {
                    OriginKind::Local => config.local_timeout,
                    OriginKind::Deployed => config.deployed_timeout,
                };
                table.add_row(vec![
                    (i + 1).to_string(),
                    origin.base_url.clone(),
                    format!("{:?}", origin.kind).to_lowercase(),
                    format!("{}s", timeout.as_secs()),
                ]);
            }
            out.push_str(&table.render());
            out.push_str(&format!(
                "\nSlow reports use {}s on the deployed origin.",
                config.slow_timeout.as_secs()
            ));
            out
        },
    )
}
