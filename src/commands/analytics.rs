use std::time::Duration;

use anyhow::bail;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::App;
use crate::cli::ReportArgs;
use crate::format::{format_cop_f64, format_delta, format_percent};
use crate::reports::{
    self, inventory_alerts, page_total, DateRange, Report, ReportKind, ReportQuery, ViewState,
    DEFAULT_LOW_STOCK_THRESHOLD,
};
use crate::table::{Align, Column, Table};

/// Columns shown for row reports; wider payloads are cut.
const MAX_COLUMNS: usize = 8;

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn range_from_args(args: &ReportArgs, today: NaiveDate) -> anyhow::Result<DateRange> {
    if let Some(days) = args.days {
        return Ok(DateRange::last_days(today, days)?);
    }
    let today_str = today.format("%Y-%m-%d").to_string();
    let to = args.to.clone().unwrap_or_else(|| today_str.clone());
    let from = args.from.clone().unwrap_or_else(|| to.clone());
    Ok(DateRange::parse(&from, &to)?)
}

pub async fn report(
    app: &App,
    args: &ReportArgs,
    cancel: Option<CancellationToken>,
) -> anyhow::Result<String> {
    let range = range_from_args(args, today())?;
    let mut query = ReportQuery::new(range);
    query.limit = args.limit;
    query.page = args.page;
    query.start = args.start;
    if let Some(secs) = args.timeout.filter(|s| *s > 0) {
        query = query.timeout(Duration::from_secs(secs));
    }

    if !app.json {
        eprintln!(
            "Loading {} ({} to {})...",
            args.kind.title(),
            range.start_str(),
            range.end_str()
        );
    }
    let state = ViewState::from_result(reports::fetch_report(&app.api, args.kind, &query, cancel).await);
    render_report(app, args, state)
}

fn render_report(app: &App, args: &ReportArgs, state: ViewState<Report>) -> anyhow::Result<String> {
    let report = match state {
        ViewState::Ready(report) => report,
        ViewState::Empty => {
            return app.render(&json!({ "state": "empty", "rows": [] }), || {
                format!("{}: no data for this range.", args.kind.title())
            })
        }
        ViewState::Error { message, retryable } => {
            if retryable {
                bail!("{message}\nRun the command again to retry.");
            }
            bail!("{message}");
        }
        ViewState::Loading => return Ok(String::new()),
    };

    let needle = args.filter.as_deref().unwrap_or("");
    let rows = reports::filter_rows(report.rows(), needle, args.kind.search_fields());
    let alerts = (args.kind == ReportKind::InventoryValue).then(|| {
        let owned: Vec<Value> = rows.iter().map(|r| (*r).clone()).collect();
        inventory_alerts(&owned, args.low_stock.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD))
    });

    if app.json {
        let body = if report.rows().is_empty() {
            report.body.clone()
        } else {
            json!({ "rows": rows, "alerts": alerts })
        };
        return Ok(serde_json::to_string_pretty(&body)?);
    }

    let mut out = format!(
        "{}  {} to {}  (via {})\n\n",
        args.kind.title(),
        report.range.start_str(),
        report.range.end_str(),
        report.origin
    );

    if report.rows().is_empty() {
        out.push_str(&summary_table(&report.body).render());
        return Ok(out);
    }

    if rows.is_empty() {
        out.push_str(&format!("No rows match \"{}\".\n", needle.trim()));
        return Ok(out);
    }

    out.push_str(&rows_table(&rows).render());
    let amount_fields = args.kind.amount_fields();
    if rows.iter().any(|r| crate::value_f64(r, amount_fields).is_some()) {
        out.push_str(&format!(
            "\n{} rows, page total {}\n",
            rows.len(),
            format_cop_f64(page_total(rows.iter().copied(), amount_fields))
        ));
    } else {
        out.push_str(&format!("\n{} rows\n", rows.len()));
    }

    if let Some(alerts) = alerts.filter(|a| !a.is_empty()) {
        out.push_str("\nLow stock:\n");
        let mut table = Table::new(vec![
            Column::left("Product"),
            Column::left("SKU"),
            Column::right("Stock"),
        ]);
        for alert in alerts {
            table.add_row(vec![alert.name, alert.sku.unwrap_or_default(), alert.stock.to_string()]);
        }
        out.push_str(&table.render());
    }
    Ok(out)
}

fn is_money_key(key: &str) -> bool {
    ["total", "amount", "revenue", "sales", "value", "price", "spent", "ticket"]
        .iter()
        .any(|k| key.contains(k))
}

fn is_percent_key(key: &str) -> bool {
    ["percent", "pct", "rate", "share", "margin"]
        .iter()
        .any(|k| key.contains(k))
}

fn format_cell(key: &str, value: &Value) -> String {
    let key = key.to_ascii_lowercase();
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if is_percent_key(&key) => format_percent(f),
            Some(f) if is_money_key(&key) => format_cop_f64(f),
            _ => n.to_string(),
        },
        other => {
            let text = other.to_string();
            if text.chars().count() > 40 {
                let cut: String = text.chars().take(37).collect();
                format!("{cut}...")
            } else {
                text
            }
        }
    }
}

fn rows_table(rows: &[&Value]) -> Table {
    let keys: Vec<String> = rows
        .iter()
        .find_map(|r| r.as_object())
        .map(|obj| obj.keys().take(MAX_COLUMNS).cloned().collect())
        .unwrap_or_default();

    if keys.is_empty() {
        let mut table = Table::new(vec![Column::left("Value")]);
        for row in rows {
            table.add_row(vec![format_cell("", row)]);
        }
        return table;
    }

    let columns = keys
        .iter()
        .map(|k| {
            let numeric = rows.iter().any(|r| r.get(k).map(Value::is_number).unwrap_or(false));
            Column {
                header: k.clone(),
                align: if numeric { Align::Right } else { Align::Left },
            }
        })
        .collect();
    let mut table = Table::new(columns);
    for row in rows {
        table.add_row(
            keys.iter()
                .map(|k| row.get(k).map(|v| format_cell(k, v)).unwrap_or_default())
                .collect(),
        );
    }
    table
}

/// Key/value card for aggregate payloads (dashboard, totals, summaries).
fn summary_table(body: &Value) -> Table {
    let mut table = Table::new(vec![Column::left("Metric"), Column::right("Value")]);
    let source = match body.get("data") {
        Some(data) if data.is_object() => data,
        _ => body,
    };
    if let Some(obj) = source.as_object() {
        for (key, value) in obj {
            table.add_row(vec![key.clone(), format_cell(key, value)]);
        }
    } else {
        table.add_row(vec!["value".into(), format_cell("", source)]);
    }
    table
}

pub async fn compare_day(
    app: &App,
    date: Option<&str>,
    cancel: Option<CancellationToken>,
) -> anyhow::Result<String> {
    let day = match date {
        Some(raw) => DateRange::parse(raw, raw)?.start,
        None => today(),
    };
    let cmp = reports::compare_day(&app.api, day, cancel).await;

    app.render(&cmp, || {
        let cell = |state: &ViewState<Report>, total: Option<f64>| match (state, total) {
            (_, Some(t)) => format_cop_f64(t),
            (ViewState::Error { message, .. }, _) => format!("error: {message}"),
            (ViewState::Empty, _) => "no data".to_string(),
            _ => "-".to_string(),
        };
        let mut table = Table::new(vec![Column::left("Day"), Column::right("Sales")]);
        table.add_row(vec![
            cmp.day.format("%Y-%m-%d").to_string(),
            cell(&cmp.current, cmp.current_total),
        ]);
        table.add_row(vec![
            cmp.prior_day.format("%Y-%m-%d").to_string(),
            cell(&cmp.previous, cmp.previous_total),
        ]);
        format!("{}\nChange vs last year: {}", table.render(), format_delta(cmp.delta))
    })
}
