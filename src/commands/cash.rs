use anyhow::bail;
use chrono::Local;
use clap::ValueEnum;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::App;
use crate::cash_count::{CashCount, DenominationGroup};
use crate::cli::{CashAction, GroupArg};
use crate::closing::{self, CashClosingForm, ClosingError};
use crate::draft::{self, DraftAutosaver, DEFAULT_DEBOUNCE};
use crate::format::format_cop;
use crate::table::{Column, Table};

/// Count restored from the saved draft, or a blank one.
fn current_count(app: &App) -> (CashCount, Option<chrono::DateTime<chrono::Utc>>) {
    let mut count = CashCount::new();
    let saved_at = draft::restore_draft(app.local.as_ref()).map(|d| {
        count.load(d.entries);
        d.saved_at
    });
    (count, saved_at)
}

pub async fn handle(app: &App, action: CashAction) -> anyhow::Result<String> {
    match action {
        CashAction::Set {
            group,
            denomination,
            quantity,
        } => {
            let (mut count, _) = current_count(app);
            count.set(group.into(), denomination, &quantity)?;
            draft::save_draft(app.local.as_ref(), count.entries());
            render_count(app, &count, None)
        }
        CashAction::Count => {
            let stdin = BufReader::new(tokio::io::stdin());
            count_interactive(app, stdin).await
        }
        CashAction::Show => {
            let (count, saved_at) = current_count(app);
            render_count(app, &count, saved_at)
        }
        CashAction::Reset => {
            draft::clear_draft(app.local.as_ref());
            app.render(&json!({ "success": true }), || "Cash count cleared.".to_string())
        }
        CashAction::Submit {
            cashier,
            date,
            card,
            transfer,
            expenses,
            notes,
        } => {
            let (count, _) = current_count(app);
            let form = CashClosingForm {
                date: date.unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string()),
                cashier,
                cash_count: count.entries().clone(),
                card_total: card,
                transfer_total: transfer,
                expenses,
                notes,
            };
            submit(app, &form).await
        }
        CashAction::History { limit } => history(app, limit),
    }
}

/// Read `<coins|bills> <denomination> <quantity>` lines until `done` or EOF.
/// Each accepted edit goes through the debounced autosaver.
async fn count_interactive<R>(app: &App, input: R) -> anyhow::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let (mut count, _) = current_count(app);
    let saver = DraftAutosaver::spawn(app.local.clone(), DEFAULT_DEBOUNCE);
    eprintln!("Enter `coins|bills <denomination> <quantity>`, `done` to finish.");

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "done" | "quit" | "q") {
            break;
        }
        match apply_line(&mut count, line) {
            Ok(()) => {
                saver.notify(count.entries());
                eprintln!("  total {}", format_cop(count.totals().total));
            }
            Err(e) => eprintln!("  {e}"),
        }
    }

    saver.flush().await;
    render_count(app, &count, None)
}

fn apply_line(count: &mut CashCount, line: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (group, denomination, quantity) = match parts.as_slice() {
        [g, d, q] => (*g, *d, *q),
        [g, d] => (*g, *d, ""),
        _ => bail!("expected `<coins|bills> <denomination> <quantity>`"),
    };
    let group = GroupArg::from_str(group, true).map_err(anyhow::Error::msg)?;
    let denomination: u32 = denomination
        .parse()
        .map_err(|_| anyhow::anyhow!("'{denomination}' is not a denomination"))?;
    count.set(group.into(), denomination, quantity)?;
    Ok(())
}

fn render_count(
    app: &App,
    count: &CashCount,
    saved_at: Option<chrono::DateTime<chrono::Utc>>,
) -> anyhow::Result<String> {
    let totals = count.totals();
    app.render(
        &json!({ "entries": count.entries(), "totals": totals, "savedAt": saved_at }),
        || {
            let mut table = Table::new(vec![
                Column::left("Group"),
                Column::right("Denomination"),
                Column::right("Qty"),
                Column::right("Subtotal"),
            ]);
            for (group, denomination, qty, subtotal) in count.lines() {
                let group = match group {
                    DenominationGroup::Coins => "coins",
                    DenominationGroup::Bills => "bills",
                };
                table.add_row(vec![
                    group.to_string(),
                    format_cop(i64::from(denomination)),
                    qty.to_string(),
                    format_cop(subtotal),
                ]);
            }
            let mut out = if table.is_empty() {
                "Nothing counted yet.\n".to_string()
            } else {
                table.render()
            };
            out.push_str(&format!(
                "\nCoins: {}\nBills: {}\nTotal: {}",
                format_cop(totals.coins),
                format_cop(totals.bills),
                format_cop(totals.total)
            ));
            if let Some(at) = saved_at {
                out.push_str(&format!("\nDraft saved {}", at.format("%Y-%m-%d %H:%M UTC")));
            }
            out
        },
    )
}

async fn submit(app: &App, form: &CashClosingForm) -> anyhow::Result<String> {
    match closing::submit_closing(&app.api, &app.db, app.local.as_ref(), form).await {
        Ok(receipt) => app.render(&receipt, || {
            format!(
                "Closing {} submitted for {}.\nCash {}  Net {}",
                receipt.id,
                receipt.date,
                format_cop(receipt.cash_total),
                format_cop(receipt.net_total)
            )
        }),
        Err(ClosingError::Invalid(invalid)) => {
            if app.json {
                bail!(serde_json::to_string(&invalid.fields)?);
            }
            let lines: Vec<String> = invalid
                .fields
                .iter()
                .map(|f| format!("  {}: {}", f.field, f.message))
                .collect();
            bail!("Closing not submitted:\n{}", lines.join("\n"));
        }
        Err(e) => Err(e.into()),
    }
}

fn history(app: &App, limit: u32) -> anyhow::Result<String> {
    let records = closing::recent_closings(&app.db, limit).map_err(anyhow::Error::msg)?;
    app.render(&records, || {
        if records.is_empty() {
            return "No closings submitted from this machine.".to_string();
        }
        let mut table = Table::new(vec![
            Column::left("Date"),
            Column::left("Cashier"),
            Column::right("Cash"),
            Column::right("Card"),
            Column::right("Transfer"),
            Column::right("Expenses"),
            Column::left("Submitted"),
        ]);
        for r in &records {
            table.add_row(vec![
                r.closing_date.clone(),
                r.cashier.clone(),
                format_cop(r.cash_total),
                format_cop(r.card_total),
                format_cop(r.transfer_total),
                format_cop(r.expenses),
                r.submitted_at.clone(),
            ]);
        }
        table.render()
    })
}
