// 📊 Report Query Engine
// Parses "give me expenses from X to Y" style requests into a ReportRequest
// and aggregates the matching ledger entries.

use chrono::{Datelike, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{EngineConfig, Lexicon, RANGE_DATE};
use crate::extract::{
    detect_month, detect_property, detect_type, detect_year, parse_date_token, plausible_year,
};
use crate::model::{round_amount, EntryType, LedgerEntry, ReportRequest};
use crate::normalize::Utterance;
use crate::store::{Clock, Ledger, LedgerFilter, StoreError};

static DASH_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b({d})\s*[-–—]\s*({d})\b", d = RANGE_DATE)).unwrap()
});

static YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(\d{4})-(\d{1,2})(?:\s|$)").unwrap());

// ============================================================================
// DATE RANGE RESOLUTION
// ============================================================================

/// Where the report's date range came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSource {
    /// "from X to Y" or "X - Y"
    Explicit,
    /// Month name, YYYY-MM, this/last month, today, this year
    Keyword,
    /// Nothing in the message; current calendar month
    CurrentMonth,
}

/// First and last day of a month
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

fn date_pair(a: &str, b: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    match (parse_date_token(a, today.year()), parse_date_token(b, today.year())) {
        (Ok(from), Ok(to)) => Some((from, to)),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Ignoring report range bound: {}", e);
            None
        }
    }
}

/// "from X to Y" (vocabulary connectives) or a dash-separated date pair
pub fn explicit_range(
    lexicon: &Lexicon,
    utterance: &Utterance,
    today: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    let text = &utterance.normalized;

    lexicon
        .range_pattern
        .captures(text)
        .and_then(|caps| date_pair(&caps[1], &caps[2], today))
        .or_else(|| {
            DASH_RANGE
                .captures(text)
                .and_then(|caps| date_pair(&caps[1], &caps[2], today))
        })
}

/// Month and period keywords
pub fn keyword_range(
    lexicon: &Lexicon,
    utterance: &Utterance,
    today: NaiveDate,
) -> Option<(NaiveDate, NaiveDate)> {
    if let Some(caps) = YEAR_MONTH.captures(&utterance.normalized) {
        let year: i32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        if let Some(bounds) = month_bounds(year, month) {
            return Some(bounds);
        }
    }

    if let Some(month) = detect_month(lexicon, utterance) {
        let year = detect_year(utterance)
            .filter(|y| plausible_year(*y, today))
            .unwrap_or(today.year());
        return month_bounds(year, month);
    }

    if lexicon.last_month.matches(utterance) {
        let previous = today.checked_sub_months(Months::new(1))?;
        return month_bounds(previous.year(), previous.month());
    }

    if lexicon.this_month.matches(utterance) {
        return month_bounds(today.year(), today.month());
    }

    if lexicon.today.matches(utterance) {
        return Some((today, today));
    }

    if lexicon.this_year.matches(utterance) {
        let first = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
        let last = NaiveDate::from_ymd_opt(today.year(), 12, 31)?;
        return Some((first, last));
    }

    None
}

/// Explicit range beats keywords; `None` if neither is present
pub fn resolve_range(
    lexicon: &Lexicon,
    utterance: &Utterance,
    today: NaiveDate,
) -> Option<(NaiveDate, NaiveDate, RangeSource)> {
    if let Some((from, to)) = explicit_range(lexicon, utterance, today) {
        return Some((from, to, RangeSource::Explicit));
    }
    keyword_range(lexicon, utterance, today).map(|(from, to)| (from, to, RangeSource::Keyword))
}

/// Build the full request: range (falling back to the current month) plus
/// optional type and property filters
pub fn parse_request(
    lexicon: &Lexicon,
    utterance: &Utterance,
    today: NaiveDate,
) -> (ReportRequest, RangeSource) {
    let (from, to, source) = resolve_range(lexicon, utterance, today).unwrap_or_else(|| {
        let (from, to) = month_bounds(today.year(), today.month()).unwrap_or((today, today));
        (from, to, RangeSource::CurrentMonth)
    });

    let request = ReportRequest::new(
        detect_type(lexicon, utterance),
        detect_property(lexicon, utterance),
        from,
        to,
    );
    (request, source)
}

// ============================================================================
// EXPORT DESCRIPTOR
// ============================================================================

/// Filter descriptor an exporter can use to regenerate the report's CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportQuery {
    #[serde(rename = "from")]
    pub date_from: NaiveDate,

    #[serde(rename = "to")]
    pub date_to: NaiveDate,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<EntryType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl ExportQuery {
    pub fn from_request(request: &ReportRequest) -> Self {
        ExportQuery {
            date_from: request.date_from,
            date_to: request.date_to,
            entry_type: request.entry_type,
            property: request.property_slug.clone(),
        }
    }

    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "from={}&to={}",
            self.date_from.format("%Y-%m-%d"),
            self.date_to.format("%Y-%m-%d")
        );
        if let Some(entry_type) = self.entry_type {
            query.push_str(&format!("&type={}", entry_type));
        }
        if let Some(property) = &self.property {
            query.push_str(&format!("&property={}", urlencoding::encode(property)));
        }
        query
    }

    pub fn link(&self, export_path: &str) -> String {
        format!("{}?{}", export_path, self.to_query_string())
    }

    pub fn filter(&self) -> LedgerFilter {
        let (from, to) = if self.date_from <= self.date_to {
            (self.date_from, self.date_to)
        } else {
            (self.date_to, self.date_from)
        };
        LedgerFilter {
            property_slug: self.property.clone(),
            entry_type: self.entry_type,
            date_from: Some(from),
            date_to: Some(to),
        }
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryTotal {
    pub category: String,
    pub total: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub request: ReportRequest,
    pub range_source: RangeSource,
    /// Sum of all matching amounts
    pub total: f64,
    pub count: usize,
    pub income_total: f64,
    pub expense_total: f64,
    /// Top categories by summed amount, descending (first seen breaks ties)
    pub categories: Vec<CategoryTotal>,
    pub export: ExportQuery,
}

pub fn summarize(
    request: ReportRequest,
    range_source: RangeSource,
    entries: &[LedgerEntry],
    top_n: usize,
) -> ReportSummary {
    let mut categories: Vec<CategoryTotal> = Vec::new();
    let mut income_total = 0.0;
    let mut expense_total = 0.0;

    for entry in entries {
        match entry.entry_type {
            EntryType::Income => income_total += entry.amount,
            EntryType::Expense => expense_total += entry.amount,
        }

        match categories.iter_mut().find(|c| c.category == entry.category) {
            Some(c) => {
                c.total += entry.amount;
                c.count += 1;
            }
            None => categories.push(CategoryTotal {
                category: entry.category.clone(),
                total: entry.amount,
                count: 1,
            }),
        }
    }

    for c in categories.iter_mut() {
        c.total = round_amount(c.total);
    }
    // Stable sort keeps first-seen order among equal totals
    categories.sort_by(|a, b| b.total.total_cmp(&a.total));
    categories.truncate(top_n);

    let export = ExportQuery::from_request(&request);
    ReportSummary {
        request,
        range_source,
        total: round_amount(income_total + expense_total),
        count: entries.len(),
        income_total: round_amount(income_total),
        expense_total: round_amount(expense_total),
        categories,
        export,
    }
}

/// Human-readable Greek summary
pub fn render(summary: &ReportSummary, lexicon: &Lexicon, export_link: &str) -> String {
    let request = &summary.request;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "📊 Αναφορά {} έως {}",
        request.date_from.format("%d/%m/%Y"),
        request.date_to.format("%d/%m/%Y")
    );

    let kind = match request.entry_type {
        Some(EntryType::Expense) => "Έξοδα",
        Some(EntryType::Income) => "Έσοδα",
        None => "Όλα",
    };
    let property = request
        .property_slug
        .as_deref()
        .map(|slug| lexicon.property_name(slug))
        .unwrap_or("όλα");
    let _ = writeln!(out, "Τύπος: {} | Ακίνητο: {}", kind, property);

    if summary.count == 0 {
        out.push_str("Δεν βρέθηκαν κινήσεις για αυτό το διάστημα.");
        return out;
    }

    let _ = writeln!(out, "Σύνολο: {:.2} € ({} κινήσεις)", summary.total, summary.count);
    if request.entry_type.is_none() {
        let _ = writeln!(
            out,
            "Έσοδα: {:.2} € | Έξοδα: {:.2} € | Καθαρό: {:.2} €",
            summary.income_total,
            summary.expense_total,
            round_amount(summary.income_total - summary.expense_total)
        );
    }

    if !summary.categories.is_empty() {
        out.push_str("Κατηγορίες:\n");
        for c in &summary.categories {
            let _ = writeln!(out, "• {}: {:.2} € ({})", c.category, c.total, c.count);
        }
    }

    let _ = write!(out, "⬇️ CSV: {}", export_link);
    out
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportReply {
    pub text: String,
    pub export_link: String,
    pub summary: ReportSummary,
}

pub struct ReportEngine {
    lexicon: Arc<Lexicon>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ReportEngine {
    pub fn new(
        lexicon: Arc<Lexicon>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        ReportEngine {
            lexicon,
            ledger,
            clock,
            config,
        }
    }

    /// Parse and run a report request. Never touches pending state.
    pub fn handle_report(
        &self,
        message: &str,
        conversation_id: &str,
    ) -> Result<ReportReply, StoreError> {
        let utterance = Utterance::new(message);
        self.handle_utterance(&utterance, conversation_id)
    }

    pub fn handle_utterance(
        &self,
        utterance: &Utterance,
        conversation_id: &str,
    ) -> Result<ReportReply, StoreError> {
        let (request, source) = parse_request(&self.lexicon, utterance, self.clock.today());
        info!(
            "Report for {}: {} → {} ({:?}), type={:?}, property={:?}",
            conversation_id,
            request.date_from,
            request.date_to,
            source,
            request.entry_type,
            request.property_slug
        );
        self.run(request, source)
    }

    pub fn run(
        &self,
        request: ReportRequest,
        source: RangeSource,
    ) -> Result<ReportReply, StoreError> {
        let filter = LedgerFilter {
            property_slug: request.property_slug.clone(),
            entry_type: request.entry_type,
            date_from: Some(request.date_from),
            date_to: Some(request.date_to),
        };
        let entries = self.ledger.list(&filter)?;

        let summary = summarize(request, source, &entries, self.config.top_categories);
        let export_link = summary.export.link(&self.config.export_path);
        let text = render(&summary, &self.lexicon, &export_link);

        Ok(ReportReply {
            text,
            export_link,
            summary,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
