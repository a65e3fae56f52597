//! Due-date expansion for recurring templates.

use chrono::{Days, Months, NaiveDate};

use crate::types::{CalendarDate, Frequency, OwnerId, RecordId, RecurringTemplate, Transaction};

impl RecurringTemplate {
    /// Due dates from the template's start date up to and including `until`,
    /// stopping at `end_date` when set.
    ///
    /// Monthly and yearly steps are taken from the start date, so a template
    /// starting on the 31st lands on the last day of shorter months and
    /// returns to the 31st afterwards.
    pub fn occurrences(&self, until: NaiveDate) -> Vec<NaiveDate> {
        let start = self.date.naive();
        let last = match &self.end_date {
            Some(end) => end.naive().min(until),
            None => until,
        };
        let mut dates = Vec::new();
        let mut step: u32 = 0;
        while let Some(due) = nth_occurrence(start, self.frequency, step) {
            if due > last {
                break;
            }
            dates.push(due);
            step += 1;
        }
        dates
    }
}

fn nth_occurrence(start: NaiveDate, frequency: Frequency, n: u32) -> Option<NaiveDate> {
    match frequency {
        Frequency::Daily => start.checked_add_days(Days::new(u64::from(n))),
        Frequency::Weekly => start.checked_add_days(Days::new(u64::from(n) * 7)),
        Frequency::Monthly => start.checked_add_months(Months::new(n)),
        Frequency::Yearly => start.checked_add_months(Months::new(n.checked_mul(12)?)),
    }
}

/// Transaction drafts for every occurrence of `template` due by `until`.
///
/// Each draft gets a fresh id and is stamped with `owner`; the caller submits
/// them through the coordinator like any other new record.
pub fn materialize_due(
    template: &RecurringTemplate,
    until: NaiveDate,
    owner: &OwnerId,
) -> Vec<Transaction> {
    template
        .occurrences(until)
        .into_iter()
        .map(|due| Transaction {
            id: RecordId::generate(),
            owner_id: owner.clone(),
            date: CalendarDate::from_naive(due),
            amount: template.amount,
            category: template.category.clone(),
            account: template.account,
            entry_type: template.entry_type,
            description: template.description.clone(),
            tags: template.tags.clone(),
            created_at: None,
        })
        .collect()
}
