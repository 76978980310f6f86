//! HDFC Bank alert template.
//!
//! Typical alerts:
//!
//! ```text
//! Rs. 1,250.00 has been debited from account XX1234 to VPA store@okaxis on 09-01-26.
//! Rs.5000.00 is successfully credited to your account **1234 by VPA payer@ybl on 09-01-26.
//! INR 300.00 debited from A/c XX1234 on 09-JAN-26. Avl Bal: INR 9,700.00
//! ```

use regex::Regex;

use crate::pipeline::extract::{BankTemplate, DateLayout, DatePattern, PatternSet};

pub const BANK_LABEL: &str = "HDFC";

/// Build the HDFC template. Patterns are tried in order within each field.
pub fn template() -> BankTemplate {
    let patterns = PatternSet {
        amount: vec![
            Regex::new(r"(?i)(?:\brs\.?|\binr|₹)\s*([\d,]+(?:\.\d+)?)").unwrap(),
        ],
        direction: vec![
            Regex::new(r"(?i)\b(debited|withdrawn|deducted|credited|added)\b").unwrap(),
        ],
        debit_verbs: vec!["debited".into(), "withdrawn".into(), "deducted".into()],
        credit_verbs: vec!["credited".into(), "added".into()],
        account: vec![
            Regex::new(
                r"(?i)\b(?:account|a/c)\s+(?:ending\s+(?:with\s+)?)?([A-Za-z*]*[0-9][A-Za-z0-9*]*)",
            )
            .unwrap(),
        ],
        // Credits name the payer after "by".
        payer: vec![
            Regex::new(r"(?i)\bby\s+(?:vpa\s+)?(.+?)\s+(?:on|dated)\s+\d{1,2}[-/]").unwrap(),
        ],
        counterparty: vec![
            Regex::new(
                r"(?i)\bto\s+(?:vpa\s+|upi\s+id\s+)?(.+?)\s+(?:on|dated)\s+\d{1,2}[-/]",
            )
            .unwrap(),
            Regex::new(r"(?i)\bto\s+(?:vpa\s+)?(\S+@\S+)").unwrap(),
        ],
        counterparty_reject: Some(
            Regex::new(r"(?i)^(?:your\s+)?(?:account|a/c)\b").unwrap(),
        ),
        balance: vec![
            Regex::new(
                r"(?i)(?:avl\.?\s*bal(?:ance)?|available\s+balance)[:\s]*(?:rs\.?|inr|₹)?\s*([\d,]+(?:\.\d+)?)",
            )
            .unwrap(),
        ],
        date: vec![
            DatePattern {
                regex: Regex::new(r"(?i)\b(?:on|dated)\s+(\d{1,2})[-/](\d{1,2})[-/](\d{2,4})\b")
                    .unwrap(),
                layout: DateLayout::DayMonthYear,
            },
            DatePattern {
                regex: Regex::new(
                    r"(?i)\b(?:on|dated)\s+(\d{1,2})[-/ ]([a-z]{3})[-/ ](\d{2,4})\b",
                )
                .unwrap(),
                layout: DateLayout::DayMonthNameYear,
            },
        ],
    };

    BankTemplate {
        label: BANK_LABEL.into(),
        sender_markers: vec!["hdfc".into()],
        patterns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::TransactionExtractor;
    use crate::pipeline::types::{Direction, InboundMessage};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap()
    }

    fn alert(body: &str) -> InboundMessage {
        InboundMessage {
            id: "msg-42".into(),
            subject: "You have done a UPI txn. Check details!".into(),
            sender: "HDFC Bank InstaAlerts <alerts@hdfcbank.net>".into(),
            body_text: body.into(),
            received_at: received(),
        }
    }

    #[test]
    fn upi_debit_scenario() {
        let msg = alert(
            "Rs. 1,250.00 has been debited from account XX1234 to VPA store@okaxis on 09-01-26. Avl Bal: Rs. 8,750.00",
        );
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.bank_label, "HDFC");
        assert_eq!(parsed.amount, dec!(1250.00));
        assert_eq!(parsed.direction, Direction::Debit);
        assert_eq!(parsed.account_token.as_deref(), Some("XX1234"));
        assert_eq!(parsed.occurred_at.date_naive().to_string(), "2026-01-09");
        assert_eq!(parsed.balance_after, Some(dec!(8750.00)));
        assert_eq!(parsed.description, "Payment to store@okaxis");
        assert_eq!(parsed.counterparty_token.as_deref(), Some("store@okaxis"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let msg = alert(
            "Rs. 1,250.00 has been debited from account XX1234 to VPA store@okaxis on 09-01-26. Avl Bal: Rs. 8,750.00",
        );
        let t = template();
        assert_eq!(t.parse(&msg), t.parse(&msg));
        let failing = alert("Your statement is ready.");
        assert_eq!(t.parse(&failing), t.parse(&failing));
    }

    #[test]
    fn upi_credit_names_payer() {
        let msg = alert(
            "Rs.5000.00 is successfully credited to your account **1234 by VPA payer@ybl on 08-01-26.",
        );
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.amount, dec!(5000.00));
        assert_eq!(parsed.direction, Direction::Credit);
        assert_eq!(parsed.account_token.as_deref(), Some("**1234"));
        assert_eq!(parsed.description, "Payment from payer@ybl");
        assert_eq!(
            parsed.occurred_at,
            Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn debit_via_upi_names_payee_not_channel() {
        let msg = alert(
            "Rs. 250.00 has been debited from account XX1234 by UPI to VPA shop@ybl on 09-01-26.",
        );
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.direction, Direction::Debit);
        assert_eq!(parsed.counterparty_token.as_deref(), Some("shop@ybl"));
        assert_eq!(parsed.description, "Payment to shop@ybl");
    }

    #[test]
    fn own_account_is_not_a_counterparty() {
        let msg = alert("Rs 500 credited to account XX1234 on 09-01-26.");
        let parsed = template().parse(&msg).unwrap();
        assert!(parsed.counterparty_token.is_none());
        assert_eq!(parsed.description, "You have done a UPI txn. Check details!");
    }

    #[test]
    fn inr_amount_with_month_name_date() {
        let msg = alert("INR 300.00 debited from A/c XX1234 on 07-JAN-26. Avl Bal: INR 9,700.00");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.amount, dec!(300.00));
        assert_eq!(parsed.account_token.as_deref(), Some("XX1234"));
        assert_eq!(parsed.balance_after, Some(dec!(9700.00)));
        assert_eq!(parsed.occurred_at.date_naive().to_string(), "2026-01-07");
    }

    #[test]
    fn rupee_sign_and_account_ending() {
        let msg = alert("₹2,000 withdrawn from account ending 5678 at ATM");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.amount, dec!(2000));
        assert_eq!(parsed.direction, Direction::Debit);
        assert_eq!(parsed.account_token.as_deref(), Some("5678"));
    }

    #[test]
    fn seventies_date_expands_to_1900s() {
        let msg = alert("Rs. 10 debited from account XX1234 on 09-01-71.");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.occurred_at.date_naive().to_string(), "1971-01-09");
    }

    #[test]
    fn four_digit_year_accepted() {
        let msg = alert("Rs. 10 debited from account XX1234 on 05/01/2026.");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.occurred_at.date_naive().to_string(), "2026-01-05");
    }

    #[test]
    fn missing_date_uses_receipt_time() {
        let msg = alert("Rs. 99.00 debited from account XX1234 to VPA cafe@okicici.");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.occurred_at, received());
        assert_eq!(parsed.description, "Payment to cafe@okicici");
    }

    #[test]
    fn impossible_date_uses_receipt_time() {
        let msg = alert("Rs. 99.00 debited from account XX1234 on 31-02-26.");
        let parsed = template().parse(&msg).unwrap();
        assert_eq!(parsed.occurred_at, received());
    }

    #[test]
    fn no_currency_is_amount_failure() {
        let msg = alert("Your account XX1234 has been debited. Contact us for details.");
        let failure = template().parse(&msg).unwrap_err();
        assert!(failure.reason.contains("amount"));
        assert_eq!(failure.missing_fields, vec!["amount"]);
        assert_eq!(failure.source_message_id, "msg-42");
        assert!(failure.body_snapshot.starts_with("Your account"));
    }

    #[test]
    fn zero_amount_counts_as_missing() {
        let msg = alert("Rs. 0.00 debited from account XX1234");
        let failure = template().parse(&msg).unwrap_err();
        assert_eq!(failure.missing_fields, vec!["amount"]);
    }

    #[test]
    fn neither_amount_nor_direction() {
        let msg = InboundMessage {
            subject: "Statement".into(),
            ..alert("Your e-statement is ready.")
        };
        let failure = template().parse(&msg).unwrap_err();
        assert_eq!(failure.reason, "Missing required fields: amount, direction");
    }

    #[test]
    fn currency_marker_needs_word_boundary() {
        let msg = alert("Hours 5 of service debited");
        let failure = template().parse(&msg).unwrap_err();
        assert_eq!(failure.missing_fields, vec!["amount"]);
    }

    #[test]
    fn matches_hdfc_senders_only() {
        let t = template();
        assert!(t.matches_sender("alerts@hdfcbank.net"));
        assert!(t.matches_sender("HDFC Bank <ALERTS@HDFCBANK.NET>"));
        assert!(!t.matches_sender("alerts@icicibank.com"));
    }
}
