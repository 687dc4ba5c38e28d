//! Till count: quantities entered per coin and bill denomination.
//!
//! Quantities are kept exactly as typed so a half-filled form round-trips
//! through the draft store; they are parsed only when totals are computed.
//! Blank, non-numeric and negative entries count as zero.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Coin denominations in pesos.
pub const COIN_DENOMINATIONS: &[u32] = &[50, 100, 200, 500, 1000];
/// Bill denominations in pesos.
pub const BILL_DENOMINATIONS: &[u32] = &[2000, 5000, 10000, 20000, 50000, 100000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenominationGroup {
    Coins,
    Bills,
}

impl DenominationGroup {
    pub fn denominations(self) -> &'static [u32] {
        match self {
            Self::Coins => COIN_DENOMINATIONS,
            Self::Bills => BILL_DENOMINATIONS,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CashCountError {
    #[error("{value} is not a valid {group:?} denomination")]
    UnknownDenomination { group: DenominationGroup, value: u32 },
}

/// Raw form state: denomination (as text) to entered quantity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashCountEntries {
    #[serde(default)]
    pub coins: BTreeMap<String, String>,
    #[serde(default)]
    pub bills: BTreeMap<String, String>,
}

impl CashCountEntries {
    /// Every known denomination with a blank quantity.
    pub fn blank() -> Self {
        let blank = |denoms: &[u32]| denoms.iter().map(|d| (d.to_string(), String::new())).collect();
        Self {
            coins: blank(COIN_DENOMINATIONS),
            bills: blank(BILL_DENOMINATIONS),
        }
    }

    fn group(&self, group: DenominationGroup) -> &BTreeMap<String, String> {
        match group {
            DenominationGroup::Coins => &self.coins,
            DenominationGroup::Bills => &self.bills,
        }
    }

    fn group_mut(&mut self, group: DenominationGroup) -> &mut BTreeMap<String, String> {
        match group {
            DenominationGroup::Coins => &mut self.coins,
            DenominationGroup::Bills => &mut self.bills,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CashTotals {
    pub coins: i64,
    pub bills: i64,
    pub total: i64,
}

/// A quantity as typed by the operator; anything but a non-negative
/// integer is zero.
pub fn parse_quantity(raw: &str) -> i64 {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|q| *q >= 0)
        .unwrap_or(0)
}

/// Σ denomination × quantity over one group.
pub fn group_total(entries: &BTreeMap<String, String>) -> i64 {
    entries
        .iter()
        .map(|(denomination, qty)| {
            let value = denomination.trim().parse::<i64>().unwrap_or(0).max(0);
            value.saturating_mul(parse_quantity(qty))
        })
        .fold(0i64, i64::saturating_add)
}

/// The counting form with memoized totals.
#[derive(Debug, Clone)]
pub struct CashCount {
    entries: CashCountEntries,
    initial: CashCountEntries,
    totals: OnceCell<CashTotals>,
}

impl Default for CashCount {
    fn default() -> Self {
        Self::new()
    }
}

impl CashCount {
    pub fn new() -> Self {
        Self::with_initial(CashCountEntries::blank())
    }

    /// Form whose reset state is `initial`.
    pub fn with_initial(initial: CashCountEntries) -> Self {
        Self {
            entries: initial.clone(),
            initial,
            totals: OnceCell::new(),
        }
    }

    pub fn entries(&self) -> &CashCountEntries {
        &self.entries
    }

    pub fn set(
        &mut self,
        group: DenominationGroup,
        denomination: u32,
        quantity: &str,
    ) -> Result<(), CashCountError> {
        if !group.denominations().contains(&denomination) {
            return Err(CashCountError::UnknownDenomination {
                group,
                value: denomination,
            });
        }
        self.entries
            .group_mut(group)
            .insert(denomination.to_string(), quantity.trim().to_string());
        self.totals.take();
        Ok(())
    }

    pub fn quantity(&self, group: DenominationGroup, denomination: u32) -> i64 {
        self.entries
            .group(group)
            .get(&denomination.to_string())
            .map(|q| parse_quantity(q))
            .unwrap_or(0)
    }

    /// Totals, recomputed only after the maps change.
    pub fn totals(&self) -> CashTotals {
        *self.totals.get_or_init(|| {
            let coins = group_total(&self.entries.coins);
            let bills = group_total(&self.entries.bills);
            debug!(coins, bills, "recomputed cash totals");
            CashTotals {
                coins,
                bills,
                total: coins.saturating_add(bills),
            }
        })
    }

    pub fn reset(&mut self) {
        self.entries = self.initial.clone();
        self.totals.take();
    }

    /// Replace the form with `entries`; unknown denominations are dropped.
    pub fn load(&mut self, entries: CashCountEntries) {
        let mut next = CashCountEntries::blank();
        for group in [DenominationGroup::Coins, DenominationGroup::Bills] {
            for (denomination, qty) in entries.group(group) {
                let known = denomination
                    .trim()
                    .parse::<u32>()
                    .map(|d| group.denominations().contains(&d))
                    .unwrap_or(false);
                if known {
                    next.group_mut(group)
                        .insert(denomination.trim().to_string(), qty.trim().to_string());
                } else {
                    warn!(?group, denomination = %denomination, "ignoring unknown denomination");
                }
            }
        }
        self.entries = next;
        self.totals.take();
    }

    /// Non-zero lines for display: (group, denomination, quantity, subtotal).
    pub fn lines(&self) -> Vec<(DenominationGroup, u32, i64, i64)> {
        let mut lines = Vec::new();
        for group in [DenominationGroup::Coins, DenominationGroup::Bills] {
            for &denomination in group.denominations() {
                let qty = self.quantity(group, denomination);
                if qty > 0 {
                    lines.push((group, denomination, qty, i64::from(denomination) * qty));
                }
            }
        }
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.totals().total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(coins: &[(&str, &str)], bills: &[(&str, &str)]) -> CashCountEntries {
        let map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        CashCountEntries {
            coins: map(coins),
            bills: map(bills),
        }
    }

    #[test]
    fn mixed_blank_entries_total() {
        let mut count = CashCount::new();
        count.load(entries(&[("500", "2"), ("1000", "")], &[("50000", "1")]));
        let totals = count.totals();
        assert_eq!(totals.coins, 1_000);
        assert_eq!(totals.bills, 50_000);
        assert_eq!(totals.total, 51_000);
    }

    #[test]
    fn invalid_quantities_count_as_zero() {
        assert_eq!(parse_quantity(""), 0);
        assert_eq!(parse_quantity("  "), 0);
        assert_eq!(parse_quantity("abc"), 0);
        assert_eq!(parse_quantity("-4"), 0);
        assert_eq!(parse_quantity("2.5"), 0);
        assert_eq!(parse_quantity(" 7 "), 7);

        let mut count = CashCount::new();
        count.set(DenominationGroup::Coins, 100, "x").expect("set");
        count.set(DenominationGroup::Bills, 2000, "-1").expect("set");
        assert_eq!(count.totals().total, 0);
        assert!(count.is_empty());
    }

    #[test]
    fn unknown_denomination_is_rejected_on_set() {
        let mut count = CashCount::new();
        let err = count
            .set(DenominationGroup::Coins, 2000, "1")
            .expect_err("2000 is a bill");
        assert_eq!(
            err,
            CashCountError::UnknownDenomination {
                group: DenominationGroup::Coins,
                value: 2000
            }
        );
    }

    #[test]
    fn set_invalidates_memoized_totals() {
        let mut count = CashCount::new();
        count.set(DenominationGroup::Bills, 10000, "3").expect("set");
        assert_eq!(count.totals().total, 30_000);
        count.set(DenominationGroup::Bills, 10000, "4").expect("set");
        assert_eq!(count.totals().total, 40_000);
        count.set(DenominationGroup::Coins, 50, "1").expect("set");
        assert_eq!(count.totals(), CashTotals { coins: 50, bills: 40_000, total: 40_050 });
    }

    #[test]
    fn reset_then_reload_rederives_same_totals() {
        let loaded = entries(&[("200", "12"), ("50", "abc")], &[("100000", "2"), ("5000", "")]);
        let mut count = CashCount::new();
        count.load(loaded.clone());
        let first = count.totals();

        count.reset();
        assert_eq!(count.totals().total, 0);
        assert_eq!(count.entries(), &CashCountEntries::blank());

        count.load(loaded);
        assert_eq!(count.totals(), first);
        assert!(first.total >= 0);
    }

    #[test]
    fn reset_returns_to_custom_initial_state() {
        let initial = entries(&[("1000", "5")], &[]);
        let mut count = CashCount::with_initial(initial.clone());
        count.set(DenominationGroup::Coins, 1000, "9").expect("set");
        count.reset();
        assert_eq!(count.entries(), &initial);
        assert_eq!(count.totals().total, 5_000);
    }

    #[test]
    fn load_drops_unknown_denominations() {
        let mut count = CashCount::new();
        count.load(entries(&[("25", "3"), ("500", "1")], &[("7", "1")]));
        assert_eq!(count.totals().total, 500);
        assert!(!count.entries().coins.contains_key("25"));
    }

    #[test]
    fn lines_list_only_counted_denominations() {
        let mut count = CashCount::new();
        count.set(DenominationGroup::Coins, 500, "2").expect("set");
        count.set(DenominationGroup::Bills, 50000, "1").expect("set");
        assert_eq!(
            count.lines(),
            vec![
                (DenominationGroup::Coins, 500, 2, 1_000),
                (DenominationGroup::Bills, 50000, 1, 50_000),
            ]
        );
    }

    #[test]
    fn group_total_ignores_bad_keys() {
        let map: BTreeMap<String, String> = [("abc", "3"), ("1000", "2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(group_total(&map), 2_000);
    }
}
