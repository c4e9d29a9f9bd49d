use crate::cell::CellValue;
use crate::mapper::map_field;
use crate::record::ClaimRecord;

/// Lookup key for a header: trimmed, lowercased, and every run of characters
/// outside `[a-z0-9_]` collapsed to one `_`.
pub fn normalize_key(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    let mut key = String::with_capacity(lowered.len());
    let mut in_run = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
            in_run = false;
        } else if !in_run {
            key.push('_');
            in_run = true;
        }
    }
    key
}

/// Header row cells as trimmed strings.
pub fn header_names(cells: &[CellValue]) -> Vec<String> {
    cells.iter().map(|c| c.to_string().trim().to_string()).collect()
}

/// Build one record from a data row aligned with `headers` by column position.
///
/// Blank-header columns are dropped entirely. Every other column lands in
/// `raw_data`; those whose key is in the lookup table also set their field.
/// Cells past the last header are ignored, and so are headers past the row's
/// last cell (a short row simply lacks those columns).
pub fn normalize_row(headers: &[String], cells: &[CellValue]) -> ClaimRecord {
    let mut record = ClaimRecord::default();
    for (idx, header) in headers.iter().enumerate() {
        if header.trim().is_empty() {
            continue;
        }
        let Some(value) = cells.get(idx) else {
            break;
        };
        let key = normalize_key(header);
        if let Some((field, coerced)) = map_field(&key, value) {
            record.set(field, coerced);
        }
        record.raw_data.insert(key, value.clone());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_normalization() {
        assert_eq!(normalize_key("ClaimNumber_B"), "claimnumber_b");
        assert_eq!(normalize_key("  Member Custom ID_B "), "member_custom_id_b");
        assert_eq!(normalize_key("Billed ($) - B"), "billed_b");
        assert_eq!(normalize_key("3DigitPrincipalDiagnosisCode_B"), "3digitprincipaldiagnosiscode_b");
    }

    #[test]
    fn maps_known_headers_and_snapshots_everything() {
        let h = headers(&["ClaimNumber_B", "Billed_B", "IncurredDate_B", "Notes"]);
        let row = vec![
            CellValue::from("C-100"),
            CellValue::from("1500"),
            CellValue::from("45292"),
            CellValue::from("call back"),
        ];
        let rec = normalize_row(&h, &row);
        assert_eq!(rec.claim_number.as_deref(), Some("C-100"));
        assert_eq!(rec.billed_amount, Some(1500.0));
        assert_eq!(rec.incurred_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(rec.raw_data.len(), 4);
        assert_eq!(rec.raw_data["notes"], CellValue::from("call back"));
        assert_eq!(rec.raw_data["billed_b"], CellValue::from("1500"));
    }

    #[test]
    fn unknown_headers_leave_fields_untouched() {
        let h = headers(&["Claim Number", "carrier", "BILLED"]);
        let row = vec![
            CellValue::from("C-1"),
            CellValue::from("Acme"),
            CellValue::from("10"),
        ];
        let rec = normalize_row(&h, &row);
        let expected_raw = rec.raw_data.clone();
        assert_eq!(
            rec,
            crate::record::ClaimRecord {
                raw_data: expected_raw,
                ..Default::default()
            }
        );
        assert_eq!(rec.raw_data.len(), 3);
    }

    #[test]
    fn blank_headers_are_skipped_and_short_rows_stop_early() {
        let h = headers(&["", "Carrier_B", "  ", "Facility_B"]);
        let row = vec![CellValue::from("ignored"), CellValue::from("Acme")];
        let rec = normalize_row(&h, &row);
        assert_eq!(rec.carrier.as_deref(), Some("Acme"));
        assert_eq!(rec.facility, None);
        assert_eq!(rec.raw_data.len(), 1);
        assert!(!rec.raw_data.contains_key("facility_b"));
        assert!(!rec.raw_data.contains_key(""));
    }

    #[test]
    fn header_cells_are_trimmed() {
        let cells = vec![CellValue::from(" Carrier_B "), CellValue::Empty, CellValue::Number(7.0)];
        assert_eq!(header_names(&cells), vec!["Carrier_B", "", "7"]);
    }
}
