//! Line items, currencies and the summation rules over them.
//!
//! The headline total of a declaration counts TL lines only. Foreign-currency
//! lines are tracked per currency and never converted. The unconverted sum
//! of every line is available as [`nominal_total`] for views that show it,
//! under a name that makes the mixing explicit.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sitedesk_core::{DomainError, ValueObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "TL", alias = "TRY")]
    Tl,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Tl, Currency::Usd, Currency::Eur];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Tl => "TL",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TL" | "TRY" => Ok(Currency::Tl),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            other => Err(DomainError::validation(format!("unknown currency '{other}'"))),
        }
    }
}

/// A line item as typed by the user; the amount is still free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemInput {
    pub date: NaiveDate,
    pub description: String,
    pub amount: String,
    pub currency: Currency,
}

impl LineItemInput {
    pub fn new(
        date: NaiveDate,
        description: impl Into<String>,
        amount: impl Into<String>,
        currency: Currency,
    ) -> Self {
        Self {
            date,
            description: description.into(),
            amount: amount.into(),
            currency,
        }
    }
}

/// Largest amount accepted on a single line.
///
/// Keeps every total far inside `Decimal` range.
pub const MAX_LINE_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// A single dated expense entry. `amount` is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub currency: Currency,
    /// False when the typed amount was unusable and coerced to zero.
    pub amount_parsed: bool,
}

impl ValueObject for LineItem {}

impl LineItem {
    /// Normalize user input: trimmed description, lenient amount.
    ///
    /// Amounts above [`MAX_LINE_AMOUNT`] are rejected rather than coerced.
    pub fn from_input(input: &LineItemInput) -> Result<Self, DomainError> {
        let parsed = parse_amount(&input.amount);
        if let Some(amount) = parsed {
            if amount > MAX_LINE_AMOUNT {
                return Err(DomainError::validation(format!(
                    "line amount {amount} exceeds the limit of {MAX_LINE_AMOUNT}"
                )));
            }
        }
        Ok(Self {
            date: input.date,
            description: input.description.trim().to_string(),
            amount: parsed.unwrap_or(Decimal::ZERO),
            currency: input.currency,
            amount_parsed: parsed.is_some(),
        })
    }

    pub fn is_described(&self) -> bool {
        !self.description.is_empty()
    }

    /// Described and carrying an amount the user actually typed.
    pub fn is_complete(&self) -> bool {
        self.is_described() && self.amount_parsed
    }
}

/// Parse a user-entered amount; `None` if it is empty, non-numeric or
/// negative.
///
/// Separator rules:
/// - both `,` and `.` present: the right-most one is the decimal separator,
///   the other groups thousands (`1.250,50`, `1,250.50`);
/// - one kind present once: it is the decimal separator, so `1,250` and
///   `1.250` both read as 1.25;
/// - one kind present several times: it groups thousands (`1.250.000`).
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    let normalized = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) if compact.matches(',').count() > 1 => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        (None, Some(_)) if compact.matches('.').count() > 1 => compact.replace('.', ""),
        _ => compact,
    };

    match Decimal::from_str(&normalized) {
        Ok(value) if value >= Decimal::ZERO => Some(value.normalize()),
        _ => None,
    }
}

/// Parse a user-entered amount, coercing anything unusable to zero.
///
/// See [`parse_amount`] for the accepted notations.
pub fn normalize_amount(raw: &str) -> Decimal {
    parse_amount(raw).unwrap_or(Decimal::ZERO)
}

/// Overflow-free addition; a sum past `Decimal::MAX` sticks at the maximum.
pub fn add_amounts(total: Decimal, amount: Decimal) -> Decimal {
    total.checked_add(amount).unwrap_or(Decimal::MAX)
}

/// Headline total: TL lines only.
pub fn total_amount(items: &[LineItem]) -> Decimal {
    items
        .iter()
        .filter(|i| i.currency == Currency::Tl)
        .fold(Decimal::ZERO, |total, i| add_amounts(total, i.amount))
}

/// One sum per currency; currencies without lines are omitted.
pub fn totals_by_currency(items: &[LineItem]) -> BTreeMap<Currency, Decimal> {
    let mut totals = BTreeMap::new();
    for item in items {
        let total = totals.entry(item.currency).or_insert(Decimal::ZERO);
        *total = add_amounts(*total, item.amount);
    }
    totals
}

/// Sum of every line regardless of currency, without conversion.
pub fn nominal_total(items: &[LineItem]) -> Decimal {
    items
        .iter()
        .fold(Decimal::ZERO, |total, i| add_amounts(total, i.amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    fn item(amount: i64, currency: Currency) -> LineItem {
        LineItem {
            date: day(),
            description: "Yemek".to_string(),
            amount: Decimal::from(amount),
            currency,
            amount_parsed: true,
        }
    }

    #[test]
    fn amounts_accept_common_decimal_notations() {
        assert_eq!(normalize_amount("1250.50"), Decimal::new(125050, 2));
        assert_eq!(normalize_amount("1250,50"), Decimal::new(125050, 2));
        assert_eq!(normalize_amount("1.250,50"), Decimal::new(125050, 2));
        assert_eq!(normalize_amount("1,250.50"), Decimal::new(125050, 2));
        assert_eq!(normalize_amount(" 120 "), Decimal::from(120));
    }

    #[test]
    fn unusable_amounts_coerce_to_zero() {
        assert_eq!(normalize_amount(""), Decimal::ZERO);
        assert_eq!(normalize_amount("abc"), Decimal::ZERO);
        assert_eq!(normalize_amount("-40"), Decimal::ZERO);
        assert_eq!(normalize_amount("12abc"), Decimal::ZERO);
    }

    #[test]
    fn from_input_trims_description() {
        let input = LineItemInput::new(day(), "  Taksi ", "120", Currency::Tl);
        let item = LineItem::from_input(&input).unwrap();
        assert_eq!(item.description, "Taksi");
        assert!(item.is_complete());
    }

    #[test]
    fn unparsed_amounts_are_flagged() {
        let item = LineItem::from_input(&LineItemInput::new(day(), "Taxi", "abc", Currency::Tl))
            .unwrap();
        assert_eq!(item.amount, Decimal::ZERO);
        assert!(item.is_described());
        assert!(!item.is_complete());

        let zero = LineItem::from_input(&LineItemInput::new(day(), "Taxi", "0", Currency::Tl))
            .unwrap();
        assert!(zero.is_complete());
    }

    #[test]
    fn single_separator_is_decimal_and_repeated_separator_groups() {
        assert_eq!(normalize_amount("1,250"), Decimal::new(125, 2));
        assert_eq!(normalize_amount("1.250"), Decimal::new(125, 2));
        assert_eq!(normalize_amount("1.250.000"), Decimal::from(1_250_000));
        assert_eq!(normalize_amount("1,250,000"), Decimal::from(1_250_000));
        assert_eq!(normalize_amount("1.250.000,75"), Decimal::new(125000075, 2));
    }

    #[test]
    fn oversized_amounts_are_rejected() {
        let huge = LineItemInput::new(day(), "Crane", "79228162514264337593543950335", Currency::Tl);
        assert!(matches!(
            LineItem::from_input(&huge),
            Err(DomainError::Validation(_))
        ));

        assert_eq!(MAX_LINE_AMOUNT, Decimal::from(1_000_000_000_000i64));
        let at_limit = LineItemInput::new(day(), "Crane", MAX_LINE_AMOUNT.to_string(), Currency::Tl);
        assert_eq!(LineItem::from_input(&at_limit).unwrap().amount, MAX_LINE_AMOUNT);
    }

    #[test]
    fn totals_saturate_instead_of_overflowing() {
        let mut max = item(0, Currency::Tl);
        max.amount = Decimal::MAX;
        let items = vec![max.clone(), max.clone(), max];

        assert_eq!(total_amount(&items), Decimal::MAX);
        assert_eq!(nominal_total(&items), Decimal::MAX);
        assert_eq!(totals_by_currency(&items)[&Currency::Tl], Decimal::MAX);
    }

    #[test]
    fn headline_total_counts_tl_only() {
        let items = vec![item(100, Currency::Tl), item(50, Currency::Usd)];
        assert_eq!(total_amount(&items), Decimal::from(100));
    }

    #[test]
    fn nominal_total_adds_every_currency_unconverted() {
        let items = vec![item(100, Currency::Tl), item(50, Currency::Usd)];
        assert_eq!(nominal_total(&items), Decimal::from(150));
    }

    #[test]
    fn totals_by_currency_keeps_currencies_apart() {
        let items = vec![
            item(100, Currency::Tl),
            item(50, Currency::Usd),
            item(25, Currency::Usd),
        ];
        let totals = totals_by_currency(&items);
        assert_eq!(totals.get(&Currency::Tl), Some(&Decimal::from(100)));
        assert_eq!(totals.get(&Currency::Usd), Some(&Decimal::from(75)));
        assert_eq!(totals.get(&Currency::Eur), None);
    }

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!("try".parse::<Currency>().unwrap(), Currency::Tl);
        assert_eq!("Eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert!("GBP".parse::<Currency>().is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// The per-currency breakdown always adds up to the nominal total,
        /// and its TL entry always equals the headline total.
        #[test]
        fn breakdown_is_consistent_with_both_totals(
            lines in prop::collection::vec((0i64..1_000_000i64, 0usize..3usize), 0..20)
        ) {
            let items: Vec<LineItem> = lines
                .into_iter()
                .map(|(amount, c)| item(amount, Currency::ALL[c]))
                .collect();

            let by_currency = totals_by_currency(&items);
            let breakdown_sum: Decimal = by_currency.values().copied().sum();

            prop_assert_eq!(breakdown_sum, nominal_total(&items));
            prop_assert_eq!(
                by_currency.get(&Currency::Tl).copied().unwrap_or(Decimal::ZERO),
                total_amount(&items)
            );
        }

        #[test]
        fn normalized_amounts_are_never_negative(raw in ".{0,16}") {
            prop_assert!(normalize_amount(&raw) >= Decimal::ZERO);
        }
    }
}
