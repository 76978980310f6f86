//! Description → category label.
//!
//! Rules are evaluated top to bottom and the first rule with a keyword
//! contained in the lowercased description wins. Keyword sets overlap, so
//! the order is policy: a change to it is a new `POLICY_VERSION`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bumped whenever rule order or keywords change.
pub const POLICY_VERSION: &str = "2";

/// The global category catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryLabel {
    Investment,
    Rent,
    CreditCardBill,
    FoodAndDining,
    Transportation,
    Shopping,
    DigitalPayments,
    Entertainment,
    BillsAndUtilities,
    Healthcare,
    Salary,
    Uncategorized,
}

impl CategoryLabel {
    /// Catalog order, as seeded into storage.
    pub const ALL: [CategoryLabel; 12] = [
        Self::Investment,
        Self::Rent,
        Self::CreditCardBill,
        Self::FoodAndDining,
        Self::Transportation,
        Self::Shopping,
        Self::DigitalPayments,
        Self::Entertainment,
        Self::BillsAndUtilities,
        Self::Healthcare,
        Self::Salary,
        Self::Uncategorized,
    ];

    /// Display name, which is also the stored category name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Investment => "Investment",
            Self::Rent => "Rent",
            Self::CreditCardBill => "Credit Card Bill",
            Self::FoodAndDining => "Food & Dining",
            Self::Transportation => "Transportation",
            Self::Shopping => "Shopping",
            Self::DigitalPayments => "Digital Payments",
            Self::Entertainment => "Entertainment",
            Self::BillsAndUtilities => "Bills & Utilities",
            Self::Healthcare => "Healthcare",
            Self::Salary => "Salary",
            Self::Uncategorized => "Uncategorized",
        }
    }
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|label| label.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// One `(keywords → label)` entry.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub label: CategoryLabel,
    /// Lowercase substrings.
    pub keywords: Vec<&'static str>,
}

impl CategoryRule {
    fn matches(&self, description: &str) -> bool {
        self.keywords.iter().any(|k| description.contains(k))
    }
}

/// Ordered keyword classifier.
#[derive(Debug, Clone)]
pub struct Categorizer {
    rules: Vec<CategoryRule>,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Categorizer {
    /// The built-in rule set.
    pub fn new() -> Self {
        let rule = |label, keywords: &[&'static str]| CategoryRule {
            label,
            keywords: keywords.to_vec(),
        };

        let rules = vec![
            rule(
                CategoryLabel::Investment,
                &["zerodha", "groww", "mutual fund", "investment", "stock", "sip"],
            ),
            rule(
                CategoryLabel::Rent,
                &["rentok", "house rent", "rent payment", "rental", "landlord"],
            ),
            // "cred" alone would also catch "credited".
            rule(
                CategoryLabel::CreditCardBill,
                &["cred.club", "cred club", "credit card", "cc bill", "card payment"],
            ),
            rule(
                CategoryLabel::FoodAndDining,
                &[
                    "swiggy", "zomato", "food", "restaurant", "cafe", "pizza", "burger", "dominos",
                ],
            ),
            // Ahead of Digital Payments: "uber@ybl" is a ride, not a transfer.
            rule(
                CategoryLabel::Transportation,
                &[
                    "uber", "ola cabs", "olacabs", "rapido", "petrol", "fuel", "metro", "irctc",
                    "redbus", "taxi",
                ],
            ),
            // Ahead of Shopping: "store@okaxis" is a UPI handle.
            rule(
                CategoryLabel::DigitalPayments,
                &[
                    "gpay", "google pay", "phonepe", "paytm", "upi", "@", "ybl", "okaxis", "payu",
                ],
            ),
            rule(
                CategoryLabel::Shopping,
                &["amazon", "flipkart", "myntra", "shop", "store", "purchase"],
            ),
            rule(
                CategoryLabel::Entertainment,
                &["netflix", "spotify", "prime", "hotstar", "movie", "game"],
            ),
            rule(
                CategoryLabel::BillsAndUtilities,
                &[
                    "electricity", "water", "gas", "broadband", "mobile", "recharge", "bill",
                    "jio", "airtel",
                ],
            ),
            rule(
                CategoryLabel::Healthcare,
                &["hospital", "doctor", "medical", "pharmacy", "medicine", "health"],
            ),
            rule(
                CategoryLabel::Salary,
                &["salary", "income", "payment received", "credited"],
            ),
        ];

        Self { rules }
    }

    /// Classifier over a custom ordered rule list.
    pub fn with_rules(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn categorize(&self, description: &str) -> CategoryLabel {
        let description = description.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&description))
            .map(|rule| rule.label)
            .unwrap_or(CategoryLabel::Uncategorized)
    }
}
