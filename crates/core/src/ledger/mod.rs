//! Double-entry journal lines produced when a document is approved.

pub mod money;

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChartOfAccountId(pub i64);

impl fmt::Display for ChartOfAccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One journal row. Exactly one of `debit`/`credit` is non-zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub chart_of_account_id: ChartOfAccountId,
    pub debit: Decimal,
    pub credit: Decimal,
}

impl JournalLine {
    pub fn debit(chart_of_account_id: ChartOfAccountId, amount: Decimal) -> Self {
        Self { chart_of_account_id, debit: amount, credit: Decimal::ZERO }
    }

    pub fn credit(chart_of_account_id: ChartOfAccountId, amount: Decimal) -> Self {
        Self { chart_of_account_id, debit: Decimal::ZERO, credit: amount }
    }
}

/// Chart-of-account references configured for one journal feature, keyed by setting name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingAccounts {
    pub feature: String,
    pub accounts: BTreeMap<String, ChartOfAccountId>,
}

impl PostingAccounts {
    pub fn new(feature: impl Into<String>) -> Self {
        Self { feature: feature.into(), accounts: BTreeMap::new() }
    }

    pub fn with(mut self, name: impl Into<String>, account: ChartOfAccountId) -> Self {
        self.accounts.insert(name.into(), account);
        self
    }

    pub fn require(&self, name: &str) -> Result<ChartOfAccountId, DomainError> {
        self.accounts.get(name).copied().ok_or_else(|| DomainError::MissingPostingAccount {
            feature: self.feature.clone(),
            name: name.to_string(),
        })
    }
}

pub const SALES_FEATURE: &str = "sales";
pub const ACCOUNT_RECEIVABLE: &str = "account receivable";
pub const SALES_INCOME: &str = "sales income";
pub const INCOME_TAX_PAYABLE: &str = "income tax payable";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SalesReturnAccounts {
    pub receivable: ChartOfAccountId,
    pub income: ChartOfAccountId,
    pub tax: ChartOfAccountId,
}

impl SalesReturnAccounts {
    pub const SETTINGS: [&'static str; 3] = [ACCOUNT_RECEIVABLE, SALES_INCOME, INCOME_TAX_PAYABLE];

    pub fn resolve(accounts: &PostingAccounts) -> Result<Self, DomainError> {
        Ok(Self {
            receivable: accounts.require(ACCOUNT_RECEIVABLE)?,
            income: accounts.require(SALES_INCOME)?,
            tax: accounts.require(INCOME_TAX_PAYABLE)?,
        })
    }
}

/// Sales return posting: credit receivable for the gross amount, debit income for
/// the net and tax payable for the tax.
///
/// Zero-valued lines are omitted, so a zero-tax return posts two rows rather
/// than three. A row must carry exactly one non-zero side, and a `0 / 0` tax
/// row would break that.
pub fn sales_return_lines(
    amount: Decimal,
    tax: Decimal,
    accounts: &SalesReturnAccounts,
) -> Result<Vec<JournalLine>, DomainError> {
    if amount.is_sign_negative() || tax.is_sign_negative() {
        return Err(DomainError::InvariantViolation(
            "amount and tax must not be negative".to_string(),
        ));
    }
    if tax > amount {
        return Err(DomainError::InvariantViolation("tax must not exceed amount".to_string()));
    }

    let lines: Vec<JournalLine> = [
        JournalLine::credit(accounts.receivable, amount),
        JournalLine::debit(accounts.income, amount - tax),
        JournalLine::debit(accounts.tax, tax),
    ]
    .into_iter()
    .filter(|line| !(line.debit.is_zero() && line.credit.is_zero()))
    .collect();

    ensure_balanced(&lines)?;
    Ok(lines)
}

/// Returns the journal total when debits equal credits and every line is one-sided.
pub fn ensure_balanced(lines: &[JournalLine]) -> Result<Decimal, DomainError> {
    let mut debit = Decimal::ZERO;
    let mut credit = Decimal::ZERO;

    for line in lines {
        let one_sided = line.debit.is_zero() != line.credit.is_zero();
        if !one_sided || line.debit.is_sign_negative() || line.credit.is_sign_negative() {
            return Err(DomainError::InvariantViolation(format!(
                "journal line for account {} must carry exactly one positive side",
                line.chart_of_account_id
            )));
        }
        debit += line.debit;
        credit += line.credit;
    }

    if debit != credit {
        return Err(DomainError::UnbalancedJournal { debit, credit });
    }

    Ok(debit)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn accounts() -> SalesReturnAccounts {
        SalesReturnAccounts {
            receivable: ChartOfAccountId(10),
            income: ChartOfAccountId(40),
            tax: ChartOfAccountId(21),
        }
    }

    #[test]
    fn sales_return_posts_three_balanced_lines() {
        let lines =
            sales_return_lines(Decimal::new(1000, 0), Decimal::new(100, 0), &accounts())
                .expect("posting");

        assert_eq!(
            lines,
            vec![
                JournalLine::credit(ChartOfAccountId(10), Decimal::new(1000, 0)),
                JournalLine::debit(ChartOfAccountId(40), Decimal::new(900, 0)),
                JournalLine::debit(ChartOfAccountId(21), Decimal::new(100, 0)),
            ]
        );
        assert_eq!(ensure_balanced(&lines), Ok(Decimal::new(1000, 0)));
        assert_eq!(money::to_fixed(lines[1].debit, 30), "900.000000000000000000000000000000");
    }

    #[test]
    fn fractional_amounts_stay_exact() {
        let lines = sales_return_lines(Decimal::new(100_010, 2), Decimal::new(9_091, 2), &accounts())
            .expect("posting");

        assert_eq!(lines[1].debit, Decimal::new(90_919, 2));
        assert_eq!(ensure_balanced(&lines), Ok(Decimal::new(100_010, 2)));
    }

    #[test]
    fn zero_tax_omits_tax_line() {
        let lines = sales_return_lines(Decimal::new(500, 0), Decimal::ZERO, &accounts())
            .expect("posting");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.chart_of_account_id != ChartOfAccountId(21)));
        assert_eq!(ensure_balanced(&lines).expect("balanced"), Decimal::new(500, 0));
    }

    #[test]
    fn fully_taxed_return_omits_income_line() {
        let amount = Decimal::new(75, 0);
        let lines = sales_return_lines(amount, amount, &accounts()).expect("posting");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.chart_of_account_id != ChartOfAccountId(40)));
    }

    #[test]
    fn negative_or_oversized_tax_is_rejected() {
        assert!(sales_return_lines(Decimal::new(-1, 0), Decimal::ZERO, &accounts()).is_err());
        assert!(sales_return_lines(Decimal::new(10, 0), Decimal::new(11, 0), &accounts()).is_err());
    }

    #[test]
    fn unbalanced_journal_is_detected() {
        let lines = vec![
            JournalLine::credit(ChartOfAccountId(1), Decimal::new(10, 0)),
            JournalLine::debit(ChartOfAccountId(2), Decimal::new(9, 0)),
        ];
        assert_eq!(
            ensure_balanced(&lines),
            Err(DomainError::UnbalancedJournal {
                debit: Decimal::new(9, 0),
                credit: Decimal::new(10, 0)
            })
        );
    }

    #[test]
    fn two_sided_line_is_rejected() {
        let line = JournalLine {
            chart_of_account_id: ChartOfAccountId(1),
            debit: Decimal::ONE,
            credit: Decimal::ONE,
        };
        assert!(matches!(ensure_balanced(&[line]), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn missing_setting_names_feature_and_account() {
        let partial = PostingAccounts::new(SALES_FEATURE)
            .with(ACCOUNT_RECEIVABLE, ChartOfAccountId(10))
            .with(SALES_INCOME, ChartOfAccountId(40));

        assert_eq!(
            SalesReturnAccounts::resolve(&partial),
            Err(DomainError::MissingPostingAccount {
                feature: "sales".to_string(),
                name: "income tax payable".to_string()
            })
        );
    }
}
