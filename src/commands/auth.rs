use std::io::{self, BufRead, Write};

use chrono::Utc;
use serde_json::json;
use zeroize::Zeroizing;

use super::App;
use crate::auth::AuthContext;

const PASSWORD_ENV: &str = "BACKOFFICE_PASSWORD";

fn auth_context(app: &App) -> AuthContext {
    AuthContext::new(app.api.clone(), app.session.clone(), app.local.clone())
}

/// `--password`, then `BACKOFFICE_PASSWORD`, then one line from stdin.
fn resolve_password(flag: Option<String>) -> anyhow::Result<Zeroizing<String>> {
    if let Some(password) = flag {
        return Ok(Zeroizing::new(password));
    }
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(Zeroizing::new(password));
        }
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = Zeroizing::new(String::new());
    io::stdin().lock().read_line(&mut line)?;
    let len = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(len);
    Ok(line)
}

pub async fn login(app: &App, email: &str, password: Option<String>) -> anyhow::Result<String> {
    let password = resolve_password(password)?;
    let auth = auth_context(app);
    let user = auth.login(email, password).await?;
    app.render(&user, || {
        format!("Signed in as {} <{}> ({})", user.name, user.email, user.role)
    })
}

pub fn logout(app: &App) -> anyhow::Result<String> {
    auth_context(app).logout();
    app.render(&json!({ "success": true }), || "Signed out.".to_string())
}

pub fn whoami(app: &App) -> anyhow::Result<String> {
    let auth = auth_context(app);
    let lockout = auth.lockout_status();
    let Some(user) = auth.current_user() else {
        return app.render(
            &json!({ "authenticated": false, "lockout": lockout }),
            || match lockout.locked_until {
                Some(until) => format!(
                    "Not signed in. Login locked until {}.",
                    until.format("%H:%M UTC")
                ),
                None => "Not signed in.".to_string(),
            },
        );
    };

    let remaining = user.remaining_at(Utc::now());
    app.render(
        &json!({ "authenticated": true, "user": user, "remainingMinutes": remaining.num_minutes() }),
        || {
            format!(
                "{} <{}> ({})\nSigned in {}, session ends in {}h {:02}m",
                user.name,
                user.email,
                user.role,
                user.login_time.format("%Y-%m-%d %H:%M UTC"),
                remaining.num_hours(),
                remaining.num_minutes() % 60
            )
        },
    )
}
