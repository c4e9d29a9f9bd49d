//! Header-to-field lookup and cell coercion.
//!
//! Coercion never fails loudly: a cell that cannot be read as the field's
//! type becomes `None` so one malformed cell cannot abort a large import.

use crate::cell::CellValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Days between 1899-12-30 (spreadsheet day zero) and 1970-01-01.
pub const SERIAL_EPOCH_OFFSET: f64 = 25569.0;

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d", "%m/%d/%y", "%d-%b-%Y", "%b %d %Y", "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Decimal,
}

/// Canonical claim columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimField {
    Carrier,
    GroupName,
    ClaimNumber,
    SubscriberId,
    MemberId,
    MemberCustomId,
    IncurredDate,
    PaidDate,
    BilledAmount,
    AllowedAmount,
    PaidAmount,
    MemberPaidAmount,
    CobAmount,
    CoinsuranceAmount,
    CopaymentAmount,
    CoveredAmount,
    DeductibleAmount,
    DiscountAmount,
    NotCoveredAmount,
    DiagCodePrincipal,
    DiagDescPrincipal,
    Dx1Code,
    Dx1Desc,
    Dx2Code,
    Dx2Desc,
    Dx3Code,
    Dx3Desc,
    CptCode,
    CptCategory,
    CptDescription,
    IcdProcCode1,
    IcdProcDesc1,
    IcdProcCode2,
    IcdProcDesc2,
    DrgCode,
    DrgDescription,
    ServiceCategory,
    Facility,
    BenefitPackage,
}

/// Normalized source header key => canonical field. Exact matches only.
const LOOKUP: &[(&str, ClaimField)] = &[
    ("carrier_b", ClaimField::Carrier),
    ("groupname_b", ClaimField::GroupName),
    ("claimnumber_b", ClaimField::ClaimNumber),
    ("subscriberid_b", ClaimField::SubscriberId),
    ("memberid_b", ClaimField::MemberId),
    ("member_custom_id_b", ClaimField::MemberCustomId),
    ("incurreddate_b", ClaimField::IncurredDate),
    ("paiddate_b", ClaimField::PaidDate),
    ("billed_b", ClaimField::BilledAmount),
    ("allowed_b", ClaimField::AllowedAmount),
    ("paid_b", ClaimField::PaidAmount),
    ("memberpaid_b", ClaimField::MemberPaidAmount),
    ("3digitprincipaldiagnosiscode_b", ClaimField::DiagCodePrincipal),
    ("3digitprincipaldiagnosisdescription_b", ClaimField::DiagDescPrincipal),
    ("dx1code_b", ClaimField::Dx1Code),
    ("dx1_b", ClaimField::Dx1Desc),
    ("dx2code_b", ClaimField::Dx2Code),
    ("dx2_b", ClaimField::Dx2Desc),
    ("dx3code_b", ClaimField::Dx3Code),
    ("dx3_b", ClaimField::Dx3Desc),
    ("cptprocedurecode_b", ClaimField::CptCode),
    ("cptprocedurecategory_b", ClaimField::CptCategory),
    ("cptproceduredescription_b", ClaimField::CptDescription),
    ("icdprocedurecode1_b", ClaimField::IcdProcCode1),
    ("icdproceduredescription1_b", ClaimField::IcdProcDesc1),
    ("icdprocedurecode2_b", ClaimField::IcdProcCode2),
    ("icdproceduredescription2_b", ClaimField::IcdProcDesc2),
    ("servicecategory_b", ClaimField::ServiceCategory),
    ("drgcode_b", ClaimField::DrgCode),
    ("drgdescription_b", ClaimField::DrgDescription),
    ("cob_b", ClaimField::CobAmount),
    ("coinsurance_b", ClaimField::CoinsuranceAmount),
    ("copayment_b", ClaimField::CopaymentAmount),
    ("covered_b", ClaimField::CoveredAmount),
    ("deductible_b", ClaimField::DeductibleAmount),
    ("discount_b", ClaimField::DiscountAmount),
    ("notcovered_b", ClaimField::NotCoveredAmount),
    ("facility_b", ClaimField::Facility),
    ("benefitpackage_b", ClaimField::BenefitPackage),
];

impl ClaimField {
    pub fn from_key(key: &str) -> Option<Self> {
        LOOKUP
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, field)| *field)
    }

    /// Every field, in lookup-table order.
    pub fn all() -> impl Iterator<Item = ClaimField> {
        LOOKUP.iter().map(|(_, field)| *field)
    }

    /// Source header key this field is read from.
    pub fn source_key(self) -> &'static str {
        LOOKUP
            .iter()
            .find(|(_, field)| *field == self)
            .map(|(k, _)| *k)
            .unwrap_or_default()
    }

    pub fn kind(self) -> FieldKind {
        use ClaimField::*;
        match self {
            IncurredDate | PaidDate => FieldKind::Date,
            BilledAmount | AllowedAmount | PaidAmount | MemberPaidAmount | CobAmount
            | CoinsuranceAmount | CopaymentAmount | CoveredAmount | DeductibleAmount
            | DiscountAmount | NotCoveredAmount => FieldKind::Decimal,
            _ => FieldKind::Text,
        }
    }
}

/// A coerced cell, tagged with the type of the field it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Decimal(Option<f64>),
}

/// Resolve a normalized header key and coerce the cell for that field.
///
/// Returns `None` when the key is not in the lookup table.
pub fn map_field(key: &str, value: &CellValue) -> Option<(ClaimField, FieldValue)> {
    let field = ClaimField::from_key(key)?;
    let coerced = match field.kind() {
        FieldKind::Text => FieldValue::Text(coerce_text(value)),
        FieldKind::Date => FieldValue::Date(coerce_date(value)),
        FieldKind::Decimal => FieldValue::Decimal(coerce_decimal(value)),
    };
    Some((field, coerced))
}

pub fn coerce_text(value: &CellValue) -> Option<String> {
    value.as_text()
}

/// Finite decimal or `None`.
pub fn coerce_decimal(value: &CellValue) -> Option<f64> {
    let n = match value {
        CellValue::Number(n) => *n,
        CellValue::Bool(b) => f64::from(u8::from(*b)),
        CellValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        CellValue::Empty | CellValue::Date(_) => return None,
    };
    n.is_finite().then_some(n)
}

/// Structured date, then day-count serial, then date text; `None` otherwise.
pub fn coerce_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(d) => Some(*d),
        CellValue::Number(n) => date_from_serial(*n),
        CellValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(serial) = s.parse::<f64>() {
                if let Some(date) = date_from_serial(serial) {
                    return Some(date);
                }
            }
            parse_date_string(s)
        }
        CellValue::Empty | CellValue::Bool(_) => None,
    }
}

/// Spreadsheet serial (days since 1899-12-30, fraction = time of day) to date.
pub fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let days = (serial - SERIAL_EPOCH_OFFSET).floor();
    if days.abs() > f64::from(i32::MAX) {
        return None;
    }
    let from_ce = i32::try_from(UNIX_EPOCH_DAYS_FROM_CE + days as i64).ok()?;
    NaiveDate::from_num_days_from_ce_opt(from_ce)
}

/// Free-form date text. Timestamps with an offset are taken in UTC.
pub fn parse_date_string(s: &str) -> Option<NaiveDate> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc).date_naive());
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts.date());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookup_table_covers_every_field_once() {
        let fields: Vec<_> = ClaimField::all().collect();
        assert_eq!(fields.len(), 39);
        for field in &fields {
            assert_eq!(ClaimField::from_key(field.source_key()), Some(*field));
        }
    }

    #[test]
    fn unknown_and_differently_cased_keys_do_not_match() {
        assert_eq!(ClaimField::from_key("claimnumber"), None);
        assert_eq!(ClaimField::from_key("ClaimNumber_B"), None);
        assert!(map_field("notes", &CellValue::from("x")).is_none());
    }

    #[test]
    fn serial_45292_is_new_year_2024() {
        assert_eq!(date_from_serial(45292.0), Some(ymd(2024, 1, 1)));
        assert_eq!(date_from_serial(45292.75), Some(ymd(2024, 1, 1)));
        assert_eq!(coerce_date(&CellValue::from("45292")), Some(ymd(2024, 1, 1)));
        assert_eq!(date_from_serial(25569.0), Some(ymd(1970, 1, 1)));
    }

    #[test]
    fn date_coercion_order() {
        assert_eq!(coerce_date(&CellValue::Date(ymd(2023, 5, 6))), Some(ymd(2023, 5, 6)));
        assert_eq!(coerce_date(&CellValue::from("2023-05-06")), Some(ymd(2023, 5, 6)));
        assert_eq!(coerce_date(&CellValue::from("05/06/2023")), Some(ymd(2023, 5, 6)));
        assert_eq!(
            coerce_date(&CellValue::from("2023-05-06T23:30:00-05:00")),
            Some(ymd(2023, 5, 7))
        );
    }

    #[test]
    fn non_dates_coerce_to_none() {
        for raw in ["not a date", "2024-13-45", "yesterday", "12/34", "inf", "NaN"] {
            assert_eq!(coerce_date(&CellValue::from(raw)), None, "{raw}");
        }
        assert_eq!(coerce_date(&CellValue::Empty), None);
        assert_eq!(coerce_date(&CellValue::Bool(true)), None);
        assert_eq!(date_from_serial(f64::NAN), None);
        assert_eq!(date_from_serial(1e300), None);
    }

    #[test]
    fn decimals_are_finite_or_none() {
        assert_eq!(coerce_decimal(&CellValue::from("1500")), Some(1500.0));
        assert_eq!(coerce_decimal(&CellValue::from(" 12.25 ")), Some(12.25));
        assert_eq!(coerce_decimal(&CellValue::Number(-3.5)), Some(-3.5));
        assert_eq!(coerce_decimal(&CellValue::from("$12")), None);
        assert_eq!(coerce_decimal(&CellValue::from("NaN")), None);
        assert_eq!(coerce_decimal(&CellValue::from("1e400")), None);
        assert_eq!(coerce_decimal(&CellValue::Number(f64::INFINITY)), None);
        assert_eq!(coerce_decimal(&CellValue::Empty), None);
        assert_eq!(coerce_decimal(&CellValue::from("   ")), None);
    }

    #[test]
    fn text_keeps_exact_stringification() {
        assert_eq!(coerce_text(&CellValue::from(" 00123 ")).as_deref(), Some(" 00123 "));
        assert_eq!(coerce_text(&CellValue::Number(1500.0)).as_deref(), Some("1500"));
        assert_eq!(coerce_text(&CellValue::Empty), None);
    }

    #[test]
    fn mapping_is_pure() {
        let cell = CellValue::from("44927");
        let first = map_field("incurreddate_b", &cell);
        let second = map_field("incurreddate_b", &cell);
        assert_eq!(first, second);
        assert_eq!(
            first,
            Some((ClaimField::IncurredDate, FieldValue::Date(Some(ymd(2023, 1, 1)))))
        );
    }
}
