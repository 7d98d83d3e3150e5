//! Cross-declaration aggregation for list views.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::declaration::{ExpenseDeclaration, ExpenseStatus};
use crate::line_item::{self, Currency, LineItem};

/// Anything that carries a declaration's status and lines.
pub trait Summarizable {
    fn status(&self) -> ExpenseStatus;
    fn is_paid(&self) -> bool;
    fn line_items(&self) -> &[LineItem];
}

impl Summarizable for ExpenseDeclaration {
    fn status(&self) -> ExpenseStatus {
        ExpenseDeclaration::status(self)
    }

    fn is_paid(&self) -> bool {
        ExpenseDeclaration::is_paid(self)
    }

    fn line_items(&self) -> &[LineItem] {
        ExpenseDeclaration::line_items(self)
    }
}

/// Count and totals over the currently visible set of declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSummary {
    pub count: usize,
    /// Sum of the headline (TL-only) totals.
    pub total_amount: Decimal,
    pub totals_by_currency: BTreeMap<Currency, Decimal>,
    pub pending: usize,
    pub approved_unpaid: usize,
    pub paid: usize,
    pub rejected: usize,
}

impl ExpenseSummary {
    pub fn collect<'a, T, I>(declarations: I) -> Self
    where
        T: Summarizable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut summary = Self::default();
        for d in declarations {
            summary.add(d);
        }
        summary
    }

    pub fn add<T: Summarizable + ?Sized>(&mut self, declaration: &T) {
        self.count += 1;
        self.total_amount = line_item::add_amounts(
            self.total_amount,
            line_item::total_amount(declaration.line_items()),
        );
        for (currency, amount) in line_item::totals_by_currency(declaration.line_items()) {
            let total = self.totals_by_currency.entry(currency).or_insert(Decimal::ZERO);
            *total = line_item::add_amounts(*total, amount);
        }

        match (declaration.status(), declaration.is_paid()) {
            (ExpenseStatus::Pending, _) => self.pending += 1,
            (ExpenseStatus::Approved, false) => self.approved_unpaid += 1,
            (ExpenseStatus::Approved, true) => self.paid += 1,
            (ExpenseStatus::Rejected, _) => self.rejected += 1,
        }
    }
}
