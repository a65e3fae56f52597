//! Read-only reports derived from cached records.
//!
//! Everything here is a pure function over slices taken from the local cache;
//! nothing is persisted or sent to the remote store.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{BudgetGoal, EntryType, RecordId, Transaction};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

// ---------------------------------------------------------------------------
// Period filter
// ---------------------------------------------------------------------------

/// Date window a report covers. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Month { year: i32, month: u32 },
    Year(i32),
    Range { from: NaiveDate, to: NaiveDate },
    All,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Period::Month { year, month } => date.year() == year && date.month() == month,
            Period::Year(year) => date.year() == year,
            Period::Range { from, to } => from <= date && date <= to,
            Period::All => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub income: Decimal,
    pub expense: Decimal,
    /// Income minus expense.
    pub net: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnualSummary {
    pub year: i32,
    /// January through December, always twelve entries.
    pub months: Vec<MonthlySummary>,
    pub income: Decimal,
    pub expense: Decimal,
    pub net: Decimal,
    pub count: usize,
}

pub fn monthly_summary(transactions: &[Transaction], year: i32, month: u32) -> MonthlySummary {
    let period = Period::Month { year, month };
    let mut summary = MonthlySummary {
        year,
        month,
        income: Decimal::ZERO,
        expense: Decimal::ZERO,
        net: Decimal::ZERO,
        count: 0,
    };
    for tx in transactions.iter().filter(|t| period.contains(t.date.naive())) {
        match tx.entry_type {
            EntryType::Income => summary.income += tx.amount,
            EntryType::Expense => summary.expense += tx.amount,
        }
        summary.count += 1;
    }
    summary.net = summary.income - summary.expense;
    summary
}

pub fn annual_summary(transactions: &[Transaction], year: i32) -> AnnualSummary {
    let months: Vec<MonthlySummary> = (1..=12)
        .map(|month| monthly_summary(transactions, year, month))
        .collect();
    let income: Decimal = months.iter().map(|m| m.income).sum();
    let expense: Decimal = months.iter().map(|m| m.expense).sum();
    let count = months.iter().map(|m| m.count).sum();
    AnnualSummary {
        year,
        months,
        income,
        expense,
        net: income - expense,
        count,
    }
}

// ---------------------------------------------------------------------------
// Category breakdown
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: Decimal,
    /// Percent of the breakdown's grand total, two decimal places.
    pub share: Decimal,
    pub count: usize,
}

/// Totals per category for one entry type, largest first.
///
/// Categories that differ only in case or surrounding whitespace are merged
/// under the first spelling seen.
pub fn category_breakdown(
    transactions: &[Transaction],
    entry_type: EntryType,
    period: Period,
) -> Vec<CategoryTotal> {
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, CategoryTotal> = HashMap::new();

    for tx in transactions
        .iter()
        .filter(|t| t.entry_type == entry_type && period.contains(t.date.naive()))
    {
        let key = category_key(&tx.category);
        let entry = totals.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            CategoryTotal {
                category: tx.category.trim().to_string(),
                total: Decimal::ZERO,
                share: Decimal::ZERO,
                count: 0,
            }
        });
        entry.total += tx.amount;
        entry.count += 1;
    }

    let grand: Decimal = totals.values().map(|c| c.total).sum();
    let mut items: Vec<CategoryTotal> = order
        .into_iter()
        .filter_map(|key| totals.remove(&key))
        .map(|mut item| {
            item.share = percent_of(item.total, grand);
            item
        })
        .collect();
    // Stable sort keeps first-seen order for equal totals.
    items.sort_by(|a, b| b.total.cmp(&a.total));
    items
}

// ---------------------------------------------------------------------------
// Budget progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetProgress {
    pub goal_id: RecordId,
    pub category: String,
    pub monthly_limit: Decimal,
    pub spent: Decimal,
    /// Never negative; see `over_limit`.
    pub remaining: Decimal,
    pub percent_used: Decimal,
    pub over_limit: bool,
}

/// Progress of each goal against the matching transactions of one month.
///
/// A goal matches transactions of its own entry type whose category equals
/// the goal's, ignoring case and surrounding whitespace.
pub fn budget_progress(
    goals: &[BudgetGoal],
    transactions: &[Transaction],
    year: i32,
    month: u32,
) -> Vec<BudgetProgress> {
    let period = Period::Month { year, month };
    goals
        .iter()
        .map(|goal| {
            let key = category_key(&goal.category);
            let spent: Decimal = transactions
                .iter()
                .filter(|t| {
                    t.entry_type == goal.entry_type
                        && period.contains(t.date.naive())
                        && category_key(&t.category) == key
                })
                .map(|t| t.amount)
                .sum();
            BudgetProgress {
                goal_id: goal.id.clone(),
                category: goal.category.clone(),
                monthly_limit: goal.monthly_limit,
                spent,
                remaining: (goal.monthly_limit - spent).max(Decimal::ZERO),
                percent_used: percent_of(spent, goal.monthly_limit),
                over_limit: spent > goal.monthly_limit,
            }
        })
        .collect()
}

fn category_key(category: &str) -> String {
    category.trim().to_lowercase()
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    (part * HUNDRED / whole).round_dp(2)
}
