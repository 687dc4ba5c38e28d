use clap::{Args, Parser, Subcommand};

use crate::cash_count::DenominationGroup;
use crate::reports::ReportKind;

/// Command-line interface for the store back office
#[derive(Parser, Debug)]
#[command(
    name = "backoffice-pos",
    version = env!("CARGO_PKG_VERSION"),
    long_version = crate::BUILD_INFO,
    about = "Store back office: cash closing, sales analytics and inventory reports",
    long_about = None
)]
pub struct Cli {
    /// Verbose logging (same as BACKOFFICE_ENV=development)
    #[arg(global = true, long)]
    pub dev: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(global = true, long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in against the backend
    Login {
        email: String,

        /// Password (falls back to BACKOFFICE_PASSWORD, then stdin)
        #[arg(long)]
        password: Option<String>,
    },

    /// Clear the stored session
    Logout,

    /// Show the signed-in operator and session age
    Whoami,

    /// View or change backend connection settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Probe every configured backend origin
    Ping,

    /// Fetch one report for a date range
    Report(ReportArgs),

    /// Quick summary for a day next to the same day last year
    CompareDay {
        /// Day to compare (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Count the till and submit the daily closing
    Cash {
        #[command(subcommand)]
        action: CashAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings and origin order
    Show,
    /// Set the deployed backend URL
    SetDeployed { url: String },
    /// Set the local origins, in priority order
    SetLocals {
        #[arg(required = true, num_args = 1..)]
        origins: Vec<String>,
    },
    /// Set the hostname used to detect the environment
    SetHostname { hostname: String },
    /// Set any backend setting by key
    Set { key: String, value: String },
    /// Forget stored settings and return to defaults
    Reset,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    #[arg(value_enum)]
    pub kind: ReportKind,

    /// First day (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Last day (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<String>,

    /// Shortcut for the last N days ending today
    #[arg(long, conflicts_with_all = ["from", "to"])]
    pub days: Option<u32>,

    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long)]
    pub page: Option<u32>,

    /// Row offset for paginated reports
    #[arg(long)]
    pub start: Option<u32>,

    /// Keep only rows containing this text
    #[arg(long)]
    pub filter: Option<String>,

    /// Stock threshold for inventory alerts (inventory-value only)
    #[arg(long)]
    pub low_stock: Option<f64>,

    /// Deployed-origin timeout in seconds for this request
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum CashAction {
    /// Enter a quantity for one denomination
    Set {
        #[arg(value_enum)]
        group: GroupArg,
        denomination: u32,
        #[arg(allow_hyphen_values = true)]
        quantity: String,
    },
    /// Enter quantities line by line (`coins 500 2`), `done` to finish
    Count,
    /// Show the current count and totals
    Show,
    /// Clear the count
    Reset,
    /// Validate and submit the daily closing
    Submit {
        #[arg(long)]
        cashier: String,
        /// Closing day (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        card: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        transfer: i64,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        expenses: i64,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List recently submitted closings
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum GroupArg {
    Coins,
    Bills,
}

impl From<GroupArg> for DenominationGroup {
    fn from(g: GroupArg) -> Self {
        match g {
            GroupArg::Coins => DenominationGroup::Coins,
            GroupArg::Bills => DenominationGroup::Bills,
        }
    }
}
