// 📤 CSV Export
// Regenerates the CSV behind a report's export link.

use std::io::Write;
use thiserror::Error;

use crate::model::LedgerEntry;
use crate::report::ExportQuery;
use crate::store::{Ledger, StoreError};

pub const HEADER: [&str; 8] = [
    "id", "date", "property", "type", "amount", "currency", "category", "label",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV flush error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write entries (already ordered) as CSV with a header row
pub fn write_csv(entries: &[LedgerEntry], writer: impl Write) -> Result<(), ExportError> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(HEADER)?;

    for entry in entries {
        let date = entry.entry_date.format("%Y-%m-%d").to_string();
        let amount = format!("{:.2}", entry.amount);

        csv.write_record([
            entry.id.as_str(),
            date.as_str(),
            entry.property_slug.as_str(),
            entry.entry_type.as_str(),
            amount.as_str(),
            entry.currency.as_str(),
            entry.category.as_str(),
            entry.label.as_deref().unwrap_or(""),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

/// CSV for everything matching an export query
pub fn export_csv(ledger: &dyn Ledger, query: &ExportQuery) -> Result<String, ExportError> {
    let entries = ledger.list(&query.filter())?;

    let mut buffer = Vec::new();
    write_csv(&entries, &mut buffer)?;

    // csv only ever writes valid UTF-8 from &str fields
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Suggested download name, e.g. `ledger_2026-01-06_2026-01-08.csv`
pub fn file_name(query: &ExportQuery) -> String {
    let mut name = format!(
        "ledger_{}_{}",
        query.date_from.format("%Y-%m-%d"),
        query.date_to.format("%Y-%m-%d")
    );
    if let Some(entry_type) = query.entry_type {
        name.push_str(&format!("_{}", entry_type));
    }
    if let Some(property) = &query.property {
        name.push_str(&format!("_{}", property));
    }
    name.push_str(".csv");
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLedger;
    use crate::model::{EntryType, CURRENCY};
    use chrono::NaiveDate;

    fn entry(id: &str, day: u32, entry_type: EntryType, label: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            entry_date: NaiveDate::from_ymd_opt(2026, 1, day).unwrap(),
            property_slug: "vourvourou".to_string(),
            entry_type,
            amount: 20.5,
            currency: CURRENCY.to_string(),
            category: "utilities".to_string(),
            label: label.map(str::to_string),
            raw_text: String::new(),
        }
    }

    #[test]
    fn test_write_csv_format() {
        let entries = vec![entry("a", 5, EntryType::Expense, Some("νερό, Ιανουάριος"))];
        let mut out = Vec::new();
        write_csv(&entries, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "id,date,property,type,amount,currency,category,label\n\
             a,2026-01-05,vourvourou,expense,20.50,EUR,utilities,\"νερό, Ιανουάριος\"\n"
        );
    }

    #[test]
    fn test_export_applies_query() {
        let ledger = MemoryLedger::new();
        ledger.insert(&entry("a", 5, EntryType::Expense, None), "1").unwrap();
        ledger.insert(&entry("b", 7, EntryType::Expense, None), "2").unwrap();
        ledger.insert(&entry("c", 7, EntryType::Income, None), "3").unwrap();

        let query = ExportQuery {
            date_from: NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2026, 1, 8).unwrap(),
            entry_type: Some(EntryType::Expense),
            property: None,
        };
        let csv = export_csv(&ledger, &query).unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("b,2026-01-07"));
        assert_eq!(file_name(&query), "ledger_2026-01-06_2026-01-08_expense.csv");
    }
}
