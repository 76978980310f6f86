//! Pattern-based transaction extraction.
//!
//! A `BankTemplate` owns one ordered pattern list per field. Fields are
//! resolved independently: the body is searched first, then the subject,
//! and within a field the first pattern that matches wins. Only amount and
//! direction are required.
//!
//! Templates are registered in an `ExtractorRegistry` keyed by sender, so a
//! new bank is a new template rather than a change to the sync pass.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::pipeline::dates::{calendar_date, resolve_occurred_at};
use crate::pipeline::types::{Direction, InboundMessage, ParseFailure, ParsedTransaction};

/// Reason recorded when no template claims a message's sender.
pub const NO_TEMPLATE_REASON: &str = "no extraction template for sender";

/// Parses notifications from one bank.
pub trait TransactionExtractor: Send + Sync {
    /// Label stored on accounts created from this template.
    fn bank_label(&self) -> &str;

    /// Whether this template handles mail from `sender`.
    fn matches_sender(&self, sender: &str) -> bool;

    /// Pure: the same message always produces the same outcome.
    fn parse(&self, message: &InboundMessage) -> Result<ParsedTransaction, ParseFailure>;
}

/// How a matched date pattern lays out its capture groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateLayout {
    /// `dd-mm-yy` / `dd/mm/yyyy`
    DayMonthYear,
    /// `dd-Mon-yy`
    DayMonthNameYear,
}

#[derive(Debug, Clone)]
pub struct DatePattern {
    pub regex: Regex,
    pub layout: DateLayout,
}

/// Ordered pattern lists, one per field. Capture group 1 holds the value
/// (dates use groups 1..=3).
#[derive(Debug, Clone)]
pub struct PatternSet {
    pub amount: Vec<Regex>,
    /// Group 1 captures a verb looked up in `debit_verbs`/`credit_verbs`.
    pub direction: Vec<Regex>,
    pub debit_verbs: Vec<String>,
    pub credit_verbs: Vec<String>,
    pub account: Vec<Regex>,
    /// Payer patterns, tried ahead of `counterparty` on credits only.
    pub payer: Vec<Regex>,
    pub counterparty: Vec<Regex>,
    /// Counterparty captures matching this are discarded (e.g. "your account").
    pub counterparty_reject: Option<Regex>,
    pub balance: Vec<Regex>,
    pub date: Vec<DatePattern>,
}

impl PatternSet {
    pub fn find_amount(&self, text: &str) -> Option<Decimal> {
        first_capture(&self.amount, text)
            .and_then(parse_money)
            .filter(|amount| *amount > Decimal::ZERO)
    }

    pub fn find_direction(&self, text: &str) -> Option<Direction> {
        let verb = first_capture(&self.direction, text)?.to_ascii_lowercase();
        if self.debit_verbs.iter().any(|v| *v == verb) {
            Some(Direction::Debit)
        } else if self.credit_verbs.iter().any(|v| *v == verb) {
            Some(Direction::Credit)
        } else {
            None
        }
    }

    pub fn find_account(&self, text: &str) -> Option<String> {
        first_capture(&self.account, text).map(|s| s.to_string())
    }

    pub fn find_counterparty(&self, text: &str, direction: Direction) -> Option<String> {
        let payer: &[Regex] = match direction {
            Direction::Credit => &self.payer,
            Direction::Debit => &[],
        };
        payer.iter().chain(&self.counterparty).find_map(|re| {
            let raw = re.captures(text)?.get(1)?.as_str();
            let cleaned = raw
                .trim()
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':'))
                .trim();
            if cleaned.is_empty() {
                return None;
            }
            if self
                .counterparty_reject
                .as_ref()
                .is_some_and(|reject| reject.is_match(cleaned))
            {
                return None;
            }
            Some(cleaned.to_string())
        })
    }

    pub fn find_balance(&self, text: &str) -> Option<Decimal> {
        first_capture(&self.balance, text).and_then(parse_money)
    }

    /// First date pattern that yields a real calendar date.
    pub fn find_date(&self, text: &str) -> Option<NaiveDate> {
        self.date.iter().find_map(|pattern| {
            let caps = pattern.regex.captures(text)?;
            let day: u32 = caps.get(1)?.as_str().parse().ok()?;
            let month = match pattern.layout {
                DateLayout::DayMonthYear => caps.get(2)?.as_str().parse().ok()?,
                DateLayout::DayMonthNameYear => month_from_name(caps.get(2)?.as_str())?,
            };
            let year_token = caps.get(3)?.as_str();
            if year_token.len() != 2 && year_token.len() != 4 {
                return None;
            }
            calendar_date(day, month, year_token.parse().ok()?)
        })
    }
}

/// Capture group 1 of the first pattern that matches.
fn first_capture<'t>(patterns: &[Regex], text: &'t str) -> Option<&'t str> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str()))
}

/// Parse a money token, dropping thousands separators.
pub fn parse_money(token: &str) -> Option<Decimal> {
    let cleaned: String = token.chars().filter(|c| *c != ',').collect();
    Decimal::from_str(&cleaned).ok()
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

/// A bank's sender markers plus its pattern set.
#[derive(Debug, Clone)]
pub struct BankTemplate {
    pub label: String,
    /// Lowercase substrings; a sender containing any of them matches.
    pub sender_markers: Vec<String>,
    pub patterns: PatternSet,
}

impl TransactionExtractor for BankTemplate {
    fn bank_label(&self) -> &str {
        &self.label
    }

    fn matches_sender(&self, sender: &str) -> bool {
        let sender = sender.to_lowercase();
        self.sender_markers.iter().any(|m| sender.contains(m.as_str()))
    }

    fn parse(&self, message: &InboundMessage) -> Result<ParsedTransaction, ParseFailure> {
        let p = &self.patterns;
        let body = message.body_text.as_str();
        let subject = message.subject.as_str();

        let amount = p.find_amount(body).or_else(|| p.find_amount(subject));
        let direction = p.find_direction(body).or_else(|| p.find_direction(subject));

        let (amount, direction) = match (amount, direction) {
            (Some(a), Some(d)) => (a, d),
            (amount, direction) => {
                let mut missing = Vec::new();
                if amount.is_none() {
                    missing.push("amount".to_string());
                }
                if direction.is_none() {
                    missing.push("direction".to_string());
                }
                let reason = format!("Missing required fields: {}", missing.join(", "));
                return Err(ParseFailure::for_message(message, reason, missing));
            }
        };

        let account_token = p.find_account(body).or_else(|| p.find_account(subject));
        let counterparty = p
            .find_counterparty(body, direction)
            .or_else(|| p.find_counterparty(subject, direction));
        let balance_after = p.find_balance(body).or_else(|| p.find_balance(subject));
        let occurred_at = resolve_occurred_at(p.find_date(body), message.received_at);

        let description = match &counterparty {
            Some(name) => format!("{} {name}", direction.description_prefix()),
            None if !subject.trim().is_empty() => subject.trim().to_string(),
            None => format!("{} transaction", self.label),
        };

        Ok(ParsedTransaction {
            bank_label: self.label.clone(),
            amount,
            direction,
            account_token,
            occurred_at,
            balance_after,
            description,
            counterparty_token: counterparty,
        })
    }
}

/// Sender-dispatched set of extractors, tried in registration order.
#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TransactionExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in bank template.
    pub fn with_builtin_templates() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::pipeline::hdfc::template()));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn TransactionExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Extract a transaction, or describe why not.
    ///
    /// Never panics and never errors: a sender no template claims, missing
    /// fields, or a panicking template all become a `ParseFailure`.
    pub fn extract(&self, message: &InboundMessage) -> Result<ParsedTransaction, ParseFailure> {
        let Some(extractor) = self
            .extractors
            .iter()
            .find(|e| e.matches_sender(&message.sender))
        else {
            debug!(message_id = %message.id, sender = %message.sender, "No template for sender");
            return Err(ParseFailure::for_message(message, NO_TEMPLATE_REASON, vec![]));
        };

        match catch_unwind(AssertUnwindSafe(|| extractor.parse(message))) {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    message_id = %message.id,
                    bank = extractor.bank_label(),
                    "Extractor panicked"
                );
                Err(ParseFailure::for_message(
                    message,
                    format!("{} extractor failed unexpectedly", extractor.bank_label()),
                    vec![],
                ))
            }
        }
    }
}
