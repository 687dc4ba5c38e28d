//! Date-ranged backend reports and the client-side helpers around them.
//!
//! Every report follows the same shape: validate a date range, request one
//! endpoint through the failover client, and turn the outcome into a view
//! state (loading, error, empty, ready). The backend does the aggregation;
//! locally we only filter already-fetched rows by text, sum the visible page,
//! and compare two independent fetches side by side.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, FetchOptions};
use crate::format::pct_change;
use crate::{value_f64, value_str};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Default stock level at or below which an item is flagged.
pub const DEFAULT_LOW_STOCK_THRESHOLD: f64 = 5.0;

// ---------------------------------------------------------------------------
// Report catalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    PeakHours,
    TopCustomers,
    TopSellers,
    CustomerRetention,
    SalesTrends,
    CrossSelling,
    Dashboard,
    InventoryValue,
    SalesTotals,
    SalesDocuments,
    QuickSummary,
}

impl ReportKind {
    pub const ALL: &'static [ReportKind] = &[
        Self::PeakHours,
        Self::TopCustomers,
        Self::TopSellers,
        Self::CustomerRetention,
        Self::SalesTrends,
        Self::CrossSelling,
        Self::Dashboard,
        Self::InventoryValue,
        Self::SalesTotals,
        Self::SalesDocuments,
        Self::QuickSummary,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::PeakHours => "/api/analytics/peak-hours",
            Self::TopCustomers => "/api/analytics/top-customers",
            Self::TopSellers => "/api/analytics/top-sellers",
            Self::CustomerRetention => "/api/analytics/customer-retention",
            Self::SalesTrends => "/api/analytics/sales-trends",
            Self::CrossSelling => "/api/analytics/cross-selling",
            Self::Dashboard => "/api/analytics/dashboard",
            Self::InventoryValue => "/api/direct/inventory/value-report",
            Self::SalesTotals => "/api/direct/sales/totals",
            Self::SalesDocuments => "/api/direct/sales/documents",
            Self::QuickSummary => "/api/sales/quick-summary",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::PeakHours => "Peak hours",
            Self::TopCustomers => "Top customers",
            Self::TopSellers => "Top sellers",
            Self::CustomerRetention => "Customer retention",
            Self::SalesTrends => "Sales trends",
            Self::CrossSelling => "Cross-selling",
            Self::Dashboard => "Dashboard",
            Self::InventoryValue => "Inventory by value",
            Self::SalesTotals => "Sales totals",
            Self::SalesDocuments => "Sales documents",
            Self::QuickSummary => "Quick summary",
        }
    }

    /// Backend needs the long timeout for this report.
    pub fn is_slow(self) -> bool {
        matches!(
            self,
            Self::CustomerRetention
                | Self::CrossSelling
                | Self::SalesTrends
                | Self::InventoryValue
                | Self::SalesDocuments
        )
    }

    /// Inventory valuation is a snapshot and ignores the range.
    pub fn is_dated(self) -> bool {
        !matches!(self, Self::InventoryValue)
    }

    pub fn is_paginated(self) -> bool {
        matches!(self, Self::SalesDocuments | Self::InventoryValue)
    }

    /// Row fields searched by the text filter.
    pub fn search_fields(self) -> &'static [&'static str] {
        match self {
            Self::TopCustomers | Self::CustomerRetention => &["name", "customer", "email", "segment"],
            Self::TopSellers | Self::CrossSelling => &["name", "product", "sku", "category"],
            Self::InventoryValue => &["name", "product", "sku", "category"],
            Self::SalesDocuments => &["number", "document", "customer", "cashier"],
            _ => &["name", "label"],
        }
    }

    /// Numeric field summed for the page total.
    pub fn amount_fields(self) -> &'static [&'static str] {
        match self {
            Self::InventoryValue => &["total_value", "value", "stock_value"],
            Self::PeakHours => &["total_sales", "sales", "total"],
            _ => &["total", "total_sales", "amount", "revenue"],
        }
    }
}

// ---------------------------------------------------------------------------
// Date ranges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateRangeError {
    #[error("Invalid start date '{0}', expected YYYY-MM-DD")]
    InvalidStart(String),
    #[error("Invalid end date '{0}', expected YYYY-MM-DD")]
    InvalidEnd(String),
    #[error("Start date {start} is after end date {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
    #[error("A range of {0} days reaches past the earliest supported date")]
    TooLong(u32),
}

/// Inclusive day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, DateRangeError> {
        let start_date = NaiveDate::parse_from_str(start.trim(), DATE_FORMAT)
            .map_err(|_| DateRangeError::InvalidStart(start.to_string()))?;
        let end_date = NaiveDate::parse_from_str(end.trim(), DATE_FORMAT)
            .map_err(|_| DateRangeError::InvalidEnd(end.to_string()))?;
        Self::new(start_date, end_date)
    }

    pub fn day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// First of the month through `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        Self {
            start: today.with_day(1).unwrap_or(today),
            end: today,
        }
    }

    /// The `days` days ending on `today`.
    pub fn last_days(today: NaiveDate, days: u32) -> Result<Self, DateRangeError> {
        let span = i64::from(days.max(1)) - 1;
        let start = today
            .checked_sub_signed(Duration::days(span))
            .ok_or(DateRangeError::TooLong(days))?;
        Ok(Self { start, end: today })
    }

    /// Same calendar days one year earlier; 29 February maps to the 28th.
    pub fn prior_year(self) -> Self {
        Self {
            start: same_day_prior_year(self.start),
            end: same_day_prior_year(self.end),
        }
    }

    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

pub fn same_day_prior_year(day: NaiveDate) -> NaiveDate {
    let year = day.year() - 1;
    NaiveDate::from_ymd_opt(year, day.month(), day.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, day.month(), 28))
        .unwrap_or(day)
}

// ---------------------------------------------------------------------------
// Queries and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub range: DateRange,
    pub limit: Option<u32>,
    pub page: Option<u32>,
    /// Row offset, for endpoints paginated by `start`.
    pub start: Option<u32>,
    /// Replaces the deployed-origin timeout.
    pub timeout: Option<std::time::Duration>,
}

impl ReportQuery {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            limit: None,
            page: None,
            start: None,
            timeout: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn offset(mut self, start: u32) -> Self {
        self.start = Some(start);
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn options(&self, kind: ReportKind) -> FetchOptions {
        let mut opts = FetchOptions::get();
        if kind.is_dated() {
            opts = opts
                .query("start_date", self.range.start_str())
                .query("end_date", self.range.end_str());
        }
        if let Some(limit) = self.limit {
            opts = opts.query("limit", limit);
        }
        if let Some(timeout) = self.timeout {
            opts = opts.timeout(timeout);
        }
        if kind.is_paginated() {
            if let Some(page) = self.page {
                opts = opts.query("page", page);
            }
            if let Some(start) = self.start {
                opts = opts.query("start", start);
            }
        }
        opts
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Range(#[from] DateRangeError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub kind: ReportKind,
    pub range: DateRange,
    pub origin: String,
    pub body: Value,
}

impl Report {
    /// Row list of the payload: the body itself or its first array under
    /// `data`, `rows`, `items` or `results`.
    pub fn rows(&self) -> &[Value] {
        rows_of(&self.body)
    }

    pub fn is_empty(&self) -> bool {
        match &self.body {
            Value::Null => true,
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty() || (has_row_list(&self.body) && self.rows().is_empty()),
            _ => false,
        }
    }
}

const ROW_KEYS: &[&str] = &["data", "rows", "items", "results"];

fn has_row_list(body: &Value) -> bool {
    ROW_KEYS.iter().any(|k| body.get(*k).map(Value::is_array).unwrap_or(false))
}

pub fn rows_of(body: &Value) -> &[Value] {
    if let Some(rows) = body.as_array() {
        return rows;
    }
    ROW_KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Fetch one report. The range is checked before anything is sent.
pub async fn fetch_report(
    api: &ApiClient,
    kind: ReportKind,
    query: &ReportQuery,
    cancel: Option<CancellationToken>,
) -> Result<Report, ReportError> {
    DateRange::new(query.range.start, query.range.end)?;

    let mut opts = query.options(kind);
    if let Some(token) = cancel {
        opts = opts.cancel(token);
    }
    let resp = api.authenticated_fetch(kind.path(), opts).await?;
    debug!(report = ?kind, origin = %resp.origin.base_url, "report fetched");
    Ok(Report {
        kind,
        range: query.range,
        origin: resp.origin.base_url,
        body: resp.body,
    })
}

// ---------------------------------------------------------------------------
// View state
// ---------------------------------------------------------------------------

/// What a report view shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ViewState<T> {
    Loading,
    Error { message: String, retryable: bool },
    Empty,
    Ready(T),
}

impl<T> ViewState<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(v) => Some(v),
            _ => None,
        }
    }
}

impl ViewState<Report> {
    pub fn from_result(result: Result<Report, ReportError>) -> Self {
        match result {
            Ok(report) if report.is_empty() => Self::Empty,
            Ok(report) => Self::Ready(report),
            Err(ReportError::Range(e)) => Self::Error {
                message: e.to_string(),
                retryable: false,
            },
            Err(ReportError::Api(e)) => {
                if !matches!(e, ApiError::Unauthorized) {
                    warn!(error = %e, "report request failed");
                }
                Self::Error {
                    retryable: e.is_retryable(),
                    message: e.to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client-side helpers
// ---------------------------------------------------------------------------

/// Rows where any of `fields` contains `needle` (case-insensitive). A blank
/// needle keeps everything.
pub fn filter_rows<'a>(rows: &'a [Value], needle: &str, fields: &[&str]) -> Vec<&'a Value> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return rows.iter().collect();
    }
    rows.iter()
        .filter(|row| {
            fields.iter().any(|field| match row.get(*field) {
                Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                Some(Value::Number(n)) => n.to_string().contains(&needle),
                _ => false,
            })
        })
        .collect()
}

/// Sum of the first present numeric field per row.
pub fn page_total<'a>(rows: impl IntoIterator<Item = &'a Value>, fields: &[&str]) -> f64 {
    rows.into_iter()
        .filter_map(|row| value_f64(row, fields))
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryAlert {
    pub name: String,
    pub sku: Option<String>,
    pub stock: f64,
}

/// Items at or below `threshold`, lowest stock first.
pub fn inventory_alerts(rows: &[Value], threshold: f64) -> Vec<InventoryAlert> {
    let mut alerts: Vec<InventoryAlert> = rows
        .iter()
        .filter_map(|row| {
            let stock = value_f64(row, &["stock", "quantity", "qty", "on_hand"])?;
            if stock > threshold {
                return None;
            }
            Some(InventoryAlert {
                name: value_str(row, &["name", "product", "description"])
                    .unwrap_or_else(|| "(unnamed)".to_string()),
                sku: value_str(row, &["sku", "code", "barcode"]),
                stock,
            })
        })
        .collect();
    alerts.sort_by(|a, b| a.stock.total_cmp(&b.stock));
    alerts
}

// ---------------------------------------------------------------------------
// Day vs prior year
// ---------------------------------------------------------------------------

const SUMMARY_TOTAL_FIELDS: &[&str] = &["total_sales", "totalSales", "total", "sales_total"];

#[derive(Debug, Clone, Serialize)]
pub struct DayComparison {
    pub day: NaiveDate,
    pub prior_day: NaiveDate,
    pub current: ViewState<Report>,
    pub previous: ViewState<Report>,
    pub current_total: Option<f64>,
    pub previous_total: Option<f64>,
    /// Percent change from the prior-year day; `None` without a baseline.
    pub delta: Option<f64>,
}

/// Quick summaries for `day` and the same day a year earlier, fetched
/// concurrently into independent slots.
pub async fn compare_day(
    api: &ApiClient,
    day: NaiveDate,
    cancel: Option<CancellationToken>,
) -> DayComparison {
    let current_range = DateRange::day(day);
    let prior_range = current_range.prior_year();
    let current_query = ReportQuery::new(current_range);
    let prior_query = ReportQuery::new(prior_range);

    let (current, previous) = tokio::join!(
        fetch_report(api, ReportKind::QuickSummary, &current_query, cancel.clone()),
        fetch_report(api, ReportKind::QuickSummary, &prior_query, cancel),
    );
    let current = ViewState::from_result(current);
    let previous = ViewState::from_result(previous);

    let current_total = current.ready().and_then(summary_total);
    let previous_total = previous.ready().and_then(summary_total);
    let delta = match (current_total, previous_total) {
        (Some(c), Some(p)) => pct_change(c, p),
        _ => None,
    };

    DayComparison {
        day,
        prior_day: prior_range.start,
        current,
        previous,
        current_total,
        previous_total,
        delta,
    }
}

fn summary_total(report: &Report) -> Option<f64> {
    value_f64(&report.body, SUMMARY_TOTAL_FIELDS)
        .or_else(|| report.body.get("data").and_then(|d| value_f64(d, SUMMARY_TOTAL_FIELDS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{client_with, test_session, Scripted, ScriptedTransport, DEPLOYED, LOCAL1};
    use serde_json::json;
    use std::sync::Arc;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn date_range_validation() {
        assert!(DateRange::parse("2026-10-01", "2026-10-15").is_ok());
        assert!(DateRange::parse("2026-10-15", "2026-10-15").is_ok());
        assert_eq!(
            DateRange::parse("2026-13-01", "2026-10-15"),
            Err(DateRangeError::InvalidStart("2026-13-01".into()))
        );
        assert_eq!(
            DateRange::parse("2026-10-01", "15/10/2026"),
            Err(DateRangeError::InvalidEnd("15/10/2026".into()))
        );
        assert!(matches!(
            DateRange::parse("2026-10-16", "2026-10-15"),
            Err(DateRangeError::Reversed { .. })
        ));
    }

    #[test]
    fn range_helpers() {
        let today = d("2026-10-16");
        assert_eq!(DateRange::month_to_date(today).start, d("2026-10-01"));
        let week = DateRange::last_days(today, 7).expect("week");
        assert_eq!((week.start, week.end), (d("2026-10-10"), today));
        assert_eq!(DateRange::last_days(today, 0).expect("today").start, today);
        assert_eq!(same_day_prior_year(d("2028-02-29")), d("2027-02-28"));
        assert_eq!(DateRange::day(today).prior_year().start, d("2025-10-16"));
    }

    #[test]
    fn huge_day_count_is_an_error() {
        let today = d("2026-10-16");
        assert_eq!(
            DateRange::last_days(today, 200_000_000),
            Err(DateRangeError::TooLong(200_000_000))
        );
        assert!(DateRange::last_days(today, u32::MAX).is_err());
    }

    #[test]
    fn slow_reports_match_client_list() {
        for kind in ReportKind::ALL {
            assert!(kind.path().starts_with("/api/"));
        }
        assert!(ReportKind::CustomerRetention.is_slow());
        assert!(ReportKind::SalesDocuments.is_slow());
        assert!(!ReportKind::PeakHours.is_slow());
    }

    #[test]
    fn rows_are_found_under_common_keys() {
        assert_eq!(rows_of(&json!([1, 2])).len(), 2);
        assert_eq!(rows_of(&json!({ "data": [1] })).len(), 1);
        assert_eq!(rows_of(&json!({ "items": [1, 2, 3] })).len(), 3);
        assert!(rows_of(&json!({ "total": 5 })).is_empty());
    }

    #[test]
    fn text_filter_and_page_total() {
        let rows = vec![
            json!({ "name": "Arepa de queso", "sku": "AR-1", "total": 12000 }),
            json!({ "name": "Café tinto", "sku": "CF-2", "total": 3000.5 }),
            json!({ "name": "Arequipe", "sku": "AQ-9", "total": "n/a" }),
        ];
        let hits = filter_rows(&rows, "  ARE ", &["name"]);
        assert_eq!(hits.len(), 2);
        assert_eq!(filter_rows(&rows, "cf-2", &["name", "sku"]).len(), 1);
        assert_eq!(filter_rows(&rows, "", &["name"]).len(), 3);
        assert_eq!(page_total(&rows, &["total"]), 15000.5);
        assert_eq!(page_total(hits, &["total"]), 12000.0);
    }

    #[test]
    fn low_stock_alerts_sorted() {
        let rows = vec![
            json!({ "name": "Leche", "sku": "L1", "stock": 4 }),
            json!({ "name": "Pan", "stock": 40 }),
            json!({ "product": "Huevos", "quantity": 0 }),
            json!({ "name": "Sin stock" }),
        ];
        let alerts = inventory_alerts(&rows, DEFAULT_LOW_STOCK_THRESHOLD);
        let names: Vec<&str> = alerts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Huevos", "Leche"]);
        assert_eq!(alerts[1].sku.as_deref(), Some("L1"));
    }

    #[tokio::test]
    async fn fetch_sends_range_and_pagination() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(LOCAL1, vec![Scripted::Json(200, json!({ "data": [{ "number": "F-1" }] }))]);
        let client = client_with("localhost", transport.clone(), test_session());

        let query = ReportQuery::new(DateRange::parse("2026-10-01", "2026-10-15").unwrap())
            .limit(50)
            .page(2);
        let report = fetch_report(&client, ReportKind::SalesDocuments, &query, None)
            .await
            .expect("report");
        assert_eq!(report.rows().len(), 1);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(
            calls[0].url,
            "http://192.168.1.100:8000/api/direct/sales/documents?start_date=2026-10-01&end_date=2026-10-15&limit=50&page=2"
        );
    }

    #[tokio::test]
    async fn reversed_range_never_hits_network() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client_with("localhost", transport.clone(), test_session());
        let query = ReportQuery::new(DateRange {
            start: d("2026-10-16"),
            end: d("2026-10-01"),
        });
        let state = ViewState::from_result(
            fetch_report(&client, ReportKind::PeakHours, &query, None).await,
        );
        assert!(matches!(state, ViewState::Error { retryable: false, .. }));
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn view_states_follow_outcome() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![
            Scripted::Json(200, json!({ "data": [] })),
            Scripted::Status(500, r#"{"message":"report engine down"}"#),
        ]);
        let client = client_with("backoffice.tienda.co", transport, test_session());
        let query = ReportQuery::new(DateRange::day(d("2026-10-15")));

        let empty = ViewState::from_result(
            fetch_report(&client, ReportKind::TopSellers, &query, None).await,
        );
        assert!(matches!(empty, ViewState::Empty));

        let failed = ViewState::from_result(
            fetch_report(&client, ReportKind::TopSellers, &query, None).await,
        );
        match failed {
            ViewState::Error { message, retryable } => {
                assert!(message.contains("report engine down"));
                assert!(retryable);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn day_comparison_computes_delta() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![
            Scripted::Json(200, json!({ "total_sales": 120000 })),
            Scripted::Json(200, json!({ "data": { "total_sales": 100000 } })),
        ]);
        let client = client_with("backoffice.tienda.co", transport.clone(), test_session());

        let cmp = compare_day(&client, d("2026-10-15"), None).await;
        assert_eq!(cmp.prior_day, d("2025-10-15"));
        assert!(cmp.current.is_ready() && cmp.previous.is_ready());

        // join! polls the current-day request first.
        assert_eq!(cmp.current_total, Some(120000.0));
        assert_eq!(cmp.previous_total, Some(100000.0));
        assert_eq!(cmp.delta, Some(20.0));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].url.contains("start_date=2025-10-15"));
    }

    #[tokio::test]
    async fn day_comparison_without_baseline() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.script(DEPLOYED, vec![
            Scripted::Json(200, json!({ "total_sales": 0 })),
            Scripted::Json(200, json!({ "total_sales": 0 })),
        ]);
        let client = client_with("backoffice.tienda.co", transport, test_session());
        let cmp = compare_day(&client, d("2026-10-15"), None).await;
        assert_eq!(cmp.delta, None);
    }
}
