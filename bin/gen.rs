use claims_ingest::ClaimField;
use clap::{Arg, Command};
use std::io::{self, Write};

const CARRIERS: [&str; 4] = ["Acme Health", "Beta Mutual", "Crescent Care", "Delta Benefits"];
const CATEGORIES: [&str; 5] = ["Inpatient", "Outpatient", "Office Visit", "Pharmacy", "Lab"];

/// Synthetic claims export for load tests: every mapped column plus one
/// unmapped `Notes` column, deterministic values.
fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(Arg::new("delim").long("delim").default_value(","))
        .get_matches();

    let rows: u64 = *matches.get_one("rows").unwrap();
    let delim = matches.get_one::<String>("delim").unwrap();

    let mut out = io::BufWriter::new(io::stdout().lock());

    let headers: Vec<String> = ClaimField::all()
        .map(|f| f.source_key().to_uppercase())
        .chain(std::iter::once("Notes".to_string()))
        .collect();
    writeln!(&mut out, "{}", headers.join(delim))?;

    for i in 0..rows {
        let cells: Vec<String> = ClaimField::all()
            .map(|field| cell(field, i))
            .chain(std::iter::once(format!("row {i}")))
            .collect();
        writeln!(&mut out, "{}", cells.join(delim))?;
        if i % 10_000 == 0 {
            out.flush()?;
        } // keep buffers moving on huge runs
    }

    out.flush()?;
    Ok(())
}

fn cell(field: ClaimField, i: u64) -> String {
    use ClaimField::*;
    match field {
        Carrier => CARRIERS[(i % 4) as usize].to_string(),
        ClaimNumber => format!("CLM{i:010}"),
        MemberId | SubscriberId => format!("M{:07}", i % 50_000),
        // serials across 2023-2024
        IncurredDate => (44927 + i % 730).to_string(),
        PaidDate => (44957 + i % 730).to_string(),
        BilledAmount => format!("{}.{:02}", 100 + i % 9_900, i % 100),
        AllowedAmount | PaidAmount => format!("{}.00", 80 + i % 5_000),
        ServiceCategory => CATEGORIES[(i % 5) as usize].to_string(),
        // some rows leave the secondary diagnoses blank
        Dx2Code | Dx2Desc | Dx3Code | Dx3Desc if i % 3 != 0 => String::new(),
        other => match other.kind() {
            claims_ingest::FieldKind::Decimal => format!("{}", i % 250),
            _ => format!("{}{}", other.source_key().trim_end_matches("_b").to_uppercase(), i % 97),
        },
    }
}
