//! Tabular import parser
//!
//! Reconstructs candidate transaction records from loosely structured
//! delimited text with no fixed schema. Per-line problems are collected,
//! never thrown; the caller always gets the partial result.

use crate::models::{CandidateTransactionRecord, ImportParseError, TransactionType};
use crate::orchestrator::{parse_money, parse_receipt_date};
use tracing::debug;

/// Category hint used when an import line carries none.
pub const DEFAULT_IMPORT_CATEGORY: &str = "Imported";

pub struct TabularImportParser;

impl TabularImportParser {
    /// Parse delimited text into candidate records plus per-line errors.
    ///
    /// The first non-blank line is always a header and always skipped; no
    /// header sniffing. Whole-batch policy (zero valid records) is the
    /// caller's concern.
    pub fn parse(text: &str) -> (Vec<CandidateTransactionRecord>, Vec<ImportParseError>) {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        let mut header_seen = false;

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !header_seen {
                header_seen = true;
                continue;
            }

            match parse_line(trimmed, line_number) {
                Ok(record) => records.push(record),
                Err(reason) => errors.push(ImportParseError {
                    line_number,
                    raw_line: trimmed.to_string(),
                    reason,
                }),
            }
        }

        debug!(
            records = records.len(),
            errors = errors.len(),
            "Tabular parse finished"
        );

        (records, errors)
    }
}

/// Split on the highest-priority delimiter present in this line:
/// comma, then tab, then runs of two or more spaces.
fn split_fields(line: &str) -> Vec<String> {
    let raw: Vec<&str> = if line.contains(',') {
        line.split(',').collect()
    } else if line.contains('\t') {
        line.split('\t').collect()
    } else {
        split_on_space_runs(line)
    };

    raw.into_iter().map(strip_field).collect()
}

fn split_on_space_runs(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b' ' && i + 1 < bytes.len() && bytes[i + 1] == b' ' {
            fields.push(&line[start..i]);
            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    fields.push(&line[start..]);
    fields
}

fn strip_field(field: &str) -> String {
    let trimmed = field.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('\'').and_then(|f| f.strip_suffix('\'')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

fn parse_line(line: &str, line_number: usize) -> std::result::Result<CandidateTransactionRecord, String> {
    let fields = split_fields(line);
    if fields.len() < 3 {
        return Err(format!(
            "expected at least 3 fields (date, description, amount), found {}",
            fields.len()
        ));
    }

    let date = parse_receipt_date(&fields[0])
        .ok_or_else(|| format!("unparseable date: '{}'", fields[0]))?;

    let description = fields[1].clone();

    let raw_amount = &fields[2];
    let amount = parse_money(raw_amount)
        .ok_or_else(|| format!("unparseable amount: '{}'", raw_amount))?;
    if amount == 0.0 {
        return Err("amount is zero".to_string());
    }

    // Deliberately crude heuristic, preserved as-is: a minus sign or a
    // "payment" token marks an expense, everything else is income.
    let inferred_type = if raw_amount.contains('-')
        || description.to_lowercase().contains("payment")
    {
        TransactionType::Expense
    } else {
        TransactionType::Income
    };

    let category_hint = fields
        .get(3)
        .filter(|f| !f.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_IMPORT_CATEGORY.to_string());

    Ok(CandidateTransactionRecord {
        raw_line: line.to_string(),
        date,
        description,
        amount: amount.abs(),
        inferred_type,
        category_hint,
        source_line: line_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_the_canonical_csv_example() {
        let text = "Date,Description,Amount,Category\n\
                    2024-01-05,Grocery Store,-45.20,Groceries\n\
                    2024-01-06,Paycheck,2000,Salary";

        let (records, errors) = TabularImportParser::parse(text);

        assert!(errors.is_empty());
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].inferred_type, TransactionType::Expense);
        assert_eq!(records[0].amount, 45.20);
        assert_eq!(records[0].category_hint, "Groceries");
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());

        assert_eq!(records[1].inferred_type, TransactionType::Income);
        assert_eq!(records[1].amount, 2000.0);
        assert_eq!(records[1].category_hint, "Salary");
    }

    #[test]
    fn unparseable_date_yields_one_error_and_no_records() {
        let text = "Date,Description,Amount\nnot-a-date,X,10";

        let (records, errors) = TabularImportParser::parse(text);

        assert!(records.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].raw_line.contains("not-a-date"));
        assert_eq!(errors[0].line_number, 2);
    }

    #[test]
    fn one_bad_line_does_not_affect_the_rest() {
        let text = "Date,Description,Amount\n\
                    2024-01-01,One,10\n\
                    2024-01-02,Two,abc\n\
                    2024-01-03,Three,30\n\
                    2024-01-04,Four,40\n\
                    2024-01-05,Five,50";

        let (records, errors) = TabularImportParser::parse(text);

        assert_eq!(records.len(), 4);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line_number, 3);
    }

    #[test]
    fn tab_and_multi_space_delimiters_are_supported() {
        let tabbed = "Date\tDescription\tAmount\n2024-02-01\tLunch\t-12.50";
        let (records, errors) = TabularImportParser::parse(tabbed);
        assert!(errors.is_empty());
        assert_eq!(records[0].description, "Lunch");

        let spaced = "Date  Description  Amount\n2024-02-01  Office supplies  -8.00";
        let (records, errors) = TabularImportParser::parse(spaced);
        assert!(errors.is_empty());
        assert_eq!(records[0].description, "Office supplies");
        assert_eq!(records[0].amount, 8.0);
    }

    #[test]
    fn quotes_and_currency_symbols_are_stripped() {
        let text = "h,h,h\n\"2024-01-05\",\"Coffee Shop\",\"$-4.50\"";
        let (records, errors) = TabularImportParser::parse(text);
        assert!(errors.is_empty());
        assert_eq!(records[0].description, "Coffee Shop");
        assert_eq!(records[0].amount, 4.50);
        assert_eq!(records[0].inferred_type, TransactionType::Expense);
    }

    #[test]
    fn payment_token_marks_an_expense_even_when_positive() {
        let text = "h,h,h\n2024-01-05,Card Payment Received,100";
        let (records, _) = TabularImportParser::parse(text);
        assert_eq!(records[0].inferred_type, TransactionType::Expense);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let text = "h,h,h\n2024-01-05,Nothing,0.00";
        let (records, errors) = TabularImportParser::parse(text);
        assert!(records.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].reason.contains("zero"));
    }

    #[test]
    fn missing_category_defaults_to_imported() {
        let text = "h,h,h\n2024-01-05,Paycheck,2000";
        let (records, _) = TabularImportParser::parse(text);
        assert_eq!(records[0].category_hint, DEFAULT_IMPORT_CATEGORY);
    }

    #[test]
    fn blank_lines_are_dropped_and_header_always_skipped() {
        let text = "\n\nDate,Description,Amount\n\n2024-01-05,Item,5\n\n";
        let (records, errors) = TabularImportParser::parse(text);
        assert!(errors.is_empty());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_line, 5);
    }
}
