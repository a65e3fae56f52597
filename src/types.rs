//! Record types shared by the local cache, the remote store and the coordinator.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ============================================================================
// Identifiers
// ============================================================================

/// Client-generated record identifier. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity that owns a record; the partition key of every remote call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

/// Owner stamped on records created while nobody is signed in.
pub const LOCAL_OWNER: &str = "local";

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn local() -> Self {
        Self(LOCAL_OWNER.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_OWNER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Transactions,
    BudgetGoals,
    RecurringTemplates,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Transactions,
        Collection::BudgetGoals,
        Collection::RecurringTemplates,
    ];

    /// Table name on the remote store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Transactions => "transactions",
            Collection::BudgetGoals => "budget_goals",
            Collection::RecurringTemplates => "recurring_transactions",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Collection::Transactions => 0,
            Collection::BudgetGoals => 1,
            Collection::RecurringTemplates => 2,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Account {
    Checking,
    Saving,
    Cash,
}

/// Direction of money flow. Amounts are magnitudes; this carries the sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Income,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

// ============================================================================
// CalendarDate
// ============================================================================

fn date_shape() -> Option<&'static Regex> {
    static SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
    SHAPE
        .get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").ok())
        .as_ref()
}

/// A `YYYY-MM-DD` calendar date with no time-of-day or zone.
///
/// Compared and serialized as the original string so a date never shifts
/// across time zones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalendarDate {
    raw: String,
    date: NaiveDate,
}

impl CalendarDate {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if !date_shape().is_some_and(|shape| shape.is_match(raw)) {
            return Err(ValidationError::InvalidDate(raw.to_string()));
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ValidationError::InvalidDate(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            date,
        })
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self {
            raw: date.format("%Y-%m-%d").to_string(),
            date,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn naive(&self) -> NaiveDate {
        self.date
    }
}

impl TryFrom<String> for CalendarDate {
    type Error = ValidationError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        CalendarDate::parse(&raw)
    }
}

impl From<CalendarDate> for String {
    fn from(date: CalendarDate) -> Self {
        date.raw
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub owner_id: OwnerId,
    pub date: CalendarDate,
    pub amount: Decimal,
    pub category: String,
    pub account: Account,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Assigned by the server on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Draft with no id or owner; both are stamped at write time.
    pub fn new(
        date: CalendarDate,
        amount: Decimal,
        entry_type: EntryType,
        account: Account,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::default(),
            owner_id: OwnerId::default(),
            date,
            amount,
            category: category.into(),
            account,
            entry_type,
            description: None,
            tags: BTreeSet::new(),
            created_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetGoal {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub owner_id: OwnerId,
    pub category: String,
    pub monthly_limit: Decimal,
    /// Which transaction type the limit tracks.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl BudgetGoal {
    pub fn new(category: impl Into<String>, monthly_limit: Decimal, entry_type: EntryType) -> Self {
        Self {
            id: RecordId::default(),
            owner_id: OwnerId::default(),
            category: category.into(),
            monthly_limit,
            entry_type,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringTemplate {
    #[serde(default)]
    pub id: RecordId,
    #[serde(default)]
    pub owner_id: OwnerId,
    /// First occurrence.
    pub date: CalendarDate,
    pub amount: Decimal,
    pub category: String,
    pub account: Account,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<CalendarDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RecurringTemplate {
    pub fn new(
        date: CalendarDate,
        amount: Decimal,
        entry_type: EntryType,
        account: Account,
        category: impl Into<String>,
        frequency: Frequency,
    ) -> Self {
        Self {
            id: RecordId::default(),
            owner_id: OwnerId::default(),
            date,
            amount,
            category: category.into(),
            account,
            entry_type,
            description: None,
            tags: BTreeSet::new(),
            frequency,
            end_date: None,
            created_at: None,
        }
    }

    pub fn with_end_date(mut self, end_date: CalendarDate) -> Self {
        self.end_date = Some(end_date);
        self
    }
}

/// Any record, tagged by the collection it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", content = "record", rename_all = "snake_case")]
pub enum Record {
    Transaction(Transaction),
    BudgetGoal(BudgetGoal),
    RecurringTemplate(RecurringTemplate),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Transaction(_) => Collection::Transactions,
            Record::BudgetGoal(_) => Collection::BudgetGoals,
            Record::RecurringTemplate(_) => Collection::RecurringTemplates,
        }
    }

    pub fn id(&self) -> &RecordId {
        match self {
            Record::Transaction(r) => &r.id,
            Record::BudgetGoal(r) => &r.id,
            Record::RecurringTemplate(r) => &r.id,
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Record::Transaction(r) => &r.owner_id,
            Record::BudgetGoal(r) => &r.owner_id,
            Record::RecurringTemplate(r) => &r.owner_id,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Record::Transaction(r) => r.created_at,
            Record::BudgetGoal(r) => r.created_at,
            Record::RecurringTemplate(r) => r.created_at,
        }
    }

    pub fn category(&self) -> &str {
        match self {
            Record::Transaction(r) => &r.category,
            Record::BudgetGoal(r) => &r.category,
            Record::RecurringTemplate(r) => &r.category,
        }
    }

    pub(crate) fn set_id(&mut self, id: RecordId) {
        match self {
            Record::Transaction(r) => r.id = id,
            Record::BudgetGoal(r) => r.id = id,
            Record::RecurringTemplate(r) => r.id = id,
        }
    }

    pub(crate) fn set_owner(&mut self, owner: OwnerId) {
        match self {
            Record::Transaction(r) => r.owner_id = owner,
            Record::BudgetGoal(r) => r.owner_id = owner,
            Record::RecurringTemplate(r) => r.owner_id = owner,
        }
    }

    pub(crate) fn set_created_at(&mut self, at: Option<DateTime<Utc>>) {
        match self {
            Record::Transaction(r) => r.created_at = at,
            Record::BudgetGoal(r) => r.created_at = at,
            Record::RecurringTemplate(r) => r.created_at = at,
        }
    }

    pub(crate) fn category_mut(&mut self) -> &mut String {
        match self {
            Record::Transaction(r) => &mut r.category,
            Record::BudgetGoal(r) => &mut r.category,
            Record::RecurringTemplate(r) => &mut r.category,
        }
    }

    /// Field-level checks. Dates are already shape-checked by `CalendarDate`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.category().trim().is_empty() {
            return Err(ValidationError::EmptyCategory);
        }
        match self {
            Record::Transaction(r) => {
                check_amount(r.amount)?;
                check_tags(&r.tags)
            }
            Record::BudgetGoal(r) => {
                if r.monthly_limit <= Decimal::ZERO {
                    return Err(ValidationError::NonPositiveLimit(r.monthly_limit));
                }
                Ok(())
            }
            Record::RecurringTemplate(r) => {
                check_amount(r.amount)?;
                check_tags(&r.tags)?;
                if let Some(end) = &r.end_date {
                    if end < &r.date {
                        return Err(ValidationError::EndBeforeStart {
                            start: r.date.to_string(),
                            end: end.to_string(),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

fn check_amount(amount: Decimal) -> Result<(), ValidationError> {
    if amount < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount(amount));
    }
    Ok(())
}

fn check_tags(tags: &BTreeSet<String>) -> Result<(), ValidationError> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(ValidationError::BlankTag);
    }
    Ok(())
}

impl From<Transaction> for Record {
    fn from(r: Transaction) -> Self {
        Record::Transaction(r)
    }
}

impl From<BudgetGoal> for Record {
    fn from(r: BudgetGoal) -> Self {
        Record::BudgetGoal(r)
    }
}

impl From<RecurringTemplate> for Record {
    fn from(r: RecurringTemplate) -> Self {
        Record::RecurringTemplate(r)
    }
}

// ============================================================================
// CacheSnapshot
// ============================================================================

/// The three collections held by the local cache, in display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub budget_goals: Vec<BudgetGoal>,
    #[serde(default)]
    pub recurring_templates: Vec<RecurringTemplate>,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.transactions.len() + self.budget_goals.len() + self.recurring_templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn collection_len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Transactions => self.transactions.len(),
            Collection::BudgetGoals => self.budget_goals.len(),
            Collection::RecurringTemplates => self.recurring_templates.len(),
        }
    }

    pub fn records(&self, collection: Collection) -> Vec<Record> {
        match collection {
            Collection::Transactions => {
                self.transactions.iter().cloned().map(Record::from).collect()
            }
            Collection::BudgetGoals => {
                self.budget_goals.iter().cloned().map(Record::from).collect()
            }
            Collection::RecurringTemplates => self
                .recurring_templates
                .iter()
                .cloned()
                .map(Record::from)
                .collect(),
        }
    }

    pub fn get(&self, collection: Collection, id: &RecordId) -> Option<Record> {
        match collection {
            Collection::Transactions => self
                .transactions
                .iter()
                .find(|r| &r.id == id)
                .cloned()
                .map(Record::from),
            Collection::BudgetGoals => self
                .budget_goals
                .iter()
                .find(|r| &r.id == id)
                .cloned()
                .map(Record::from),
            Collection::RecurringTemplates => self
                .recurring_templates
                .iter()
                .find(|r| &r.id == id)
                .cloned()
                .map(Record::from),
        }
    }

    /// Replace one collection. Records of other collections in `records` are ignored.
    pub fn set_collection(&mut self, collection: Collection, records: Vec<Record>) {
        match collection {
            Collection::Transactions => {
                self.transactions = records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Transaction(t) => Some(t),
                        _ => None,
                    })
                    .collect();
            }
            Collection::BudgetGoals => {
                self.budget_goals = records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::BudgetGoal(b) => Some(b),
                        _ => None,
                    })
                    .collect();
            }
            Collection::RecurringTemplates => {
                self.recurring_templates = records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::RecurringTemplate(t) => Some(t),
                        _ => None,
                    })
                    .collect();
            }
        }
    }

    /// Replace the record with the same id, or prepend it (newest first).
    pub fn upsert(&mut self, record: Record) {
        match record {
            Record::Transaction(r) => upsert_into(&mut self.transactions, r, |x| &x.id),
            Record::BudgetGoal(r) => upsert_into(&mut self.budget_goals, r, |x| &x.id),
            Record::RecurringTemplate(r) => {
                upsert_into(&mut self.recurring_templates, r, |x| &x.id)
            }
        }
    }

    /// Remove by id, returning the position it occupied and the record.
    pub fn remove(&mut self, collection: Collection, id: &RecordId) -> Option<(usize, Record)> {
        match collection {
            Collection::Transactions => remove_from(&mut self.transactions, id, |x| &x.id)
                .map(|(i, r)| (i, Record::from(r))),
            Collection::BudgetGoals => remove_from(&mut self.budget_goals, id, |x| &x.id)
                .map(|(i, r)| (i, Record::from(r))),
            Collection::RecurringTemplates => {
                remove_from(&mut self.recurring_templates, id, |x| &x.id)
                    .map(|(i, r)| (i, Record::from(r)))
            }
        }
    }

    /// Put a record back at `index` (clamped), replacing any same-id entry.
    pub fn insert_at(&mut self, index: usize, record: Record) {
        let id = record.id().clone();
        let collection = record.collection();
        self.remove(collection, &id);
        match record {
            Record::Transaction(r) => {
                let at = index.min(self.transactions.len());
                self.transactions.insert(at, r);
            }
            Record::BudgetGoal(r) => {
                let at = index.min(self.budget_goals.len());
                self.budget_goals.insert(at, r);
            }
            Record::RecurringTemplate(r) => {
                let at = index.min(self.recurring_templates.len());
                self.recurring_templates.insert(at, r);
            }
        }
    }

    /// Drop every record not owned by `owner`. Returns how many were dropped.
    pub fn retain_owner(&mut self, owner: &OwnerId) -> usize {
        let before = self.len();
        self.transactions.retain(|r| &r.owner_id == owner);
        self.budget_goals.retain(|r| &r.owner_id == owner);
        self.recurring_templates.retain(|r| &r.owner_id == owner);
        before - self.len()
    }
}

fn upsert_into<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> &RecordId) {
    match items.iter().position(|x| id(x) == id(&item)) {
        Some(pos) => items[pos] = item,
        None => items.insert(0, item),
    }
}

fn remove_from<T>(
    items: &mut Vec<T>,
    target: &RecordId,
    id: impl Fn(&T) -> &RecordId,
) -> Option<(usize, T)> {
    let pos = items.iter().position(|x| id(x) == target)?;
    Some((pos, items.remove(pos)))
}
