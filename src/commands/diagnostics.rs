use super::App;
use crate::table::{Column, Table};

/// Probe each configured origin's health endpoint.
pub async fn ping(app: &App) -> anyhow::Result<String> {
    let probes = app.api.test_connectivity().await;
    let remembered = app.api.connection_state().remembered();

    app.render(&probes, || {
        let mut table = Table::new(vec![
            Column::left("Origin"),
            Column::left("Kind"),
            Column::left("Status"),
            Column::right("Latency"),
            Column::left("Error"),
        ]);
        for probe in &probes {
            table.add_row(vec![
                probe.origin.base_url.clone(),
                format!("{:?}", probe.origin.kind).to_lowercase(),
                if probe.success { "ok" } else { "down" }.to_string(),
                probe
                    .latency_ms
                    .map(|ms| format!("{ms} ms"))
                    .unwrap_or_default(),
                probe.error.clone().unwrap_or_default(),
            ]);
        }
        let mut out = format!("Environment: {:?}\n\n", app.api.environment());
        out.push_str(&table.render());
        if let Some(origin) = remembered {
            out.push_str(&format!("\nLast working origin: {origin}"));
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{Scripted, ScriptedTransport, DEPLOYED, LOCAL1, LOCAL2};
    use crate::commands::tests::test_app;
    use std::sync::Arc;

    #[tokio::test]
    async fn ping_lists_every_origin() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(LOCAL1, vec![Scripted::Json(200, serde_json::json!({ "ok": true }))]);
        let app = test_app("localhost", transport);

        let out = ping(&app).await.expect("ping");
        let status: Vec<(&str, &str)> = out
            .lines()
            .filter(|l| l.starts_with("http"))
            .map(|l| {
                let mut cols = l.split_whitespace();
                (cols.next().unwrap_or(""), cols.nth(1).unwrap_or(""))
            })
            .collect();
        assert_eq!(status, vec![(LOCAL1, "ok"), (LOCAL2, "down"), (DEPLOYED, "down")]);
    }
}
