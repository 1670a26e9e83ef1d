//! CSV export of the ledger.
//!
//! One row per entry in append order. Columns not applicable to an entry's
//! kind are left empty. Amounts are rendered with two decimal places.

use chrono::DateTime;
use earmark_protocol::fee::MONEY_SCALE;
use earmark_protocol::LedgerEntry;
use rust_decimal::Decimal;

pub const CSV_HEADER: [&str; 10] = [
    "time",
    "type",
    "beneficiary_id",
    "beneficiary_name",
    "gross",
    "admin_fee",
    "student_amount",
    "filename",
    "file_hash",
    "amount_released",
];

fn money(amount: Option<Decimal>) -> String {
    match amount {
        Some(d) => {
            let mut d = earmark_protocol::fee::round_money(d);
            d.rescale(MONEY_SCALE);
            d.to_string()
        }
        None => String::new(),
    }
}

fn timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

/// Quote a field when it contains a separator, quote, or line break.
fn field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn push_row(out: &mut String, fields: &[String]) {
    let line: Vec<String> = fields.iter().map(|f| field(f)).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

pub fn ledger_csv(entries: &[LedgerEntry]) -> Vec<u8> {
    let mut out = String::new();
    let header: Vec<String> = CSV_HEADER.iter().map(|h| h.to_string()).collect();
    push_row(&mut out, &header);

    for entry in entries {
        let cols = entry.event.columns();
        push_row(
            &mut out,
            &[
                timestamp(entry.time),
                entry.event.kind().as_str().to_string(),
                entry.event.beneficiary_id().to_string(),
                entry.event.beneficiary_name().to_string(),
                money(cols.gross),
                money(cols.admin_fee),
                money(cols.student_amount),
                cols.filename.unwrap_or_default().to_string(),
                cols.file_hash.unwrap_or_default().to_string(),
                money(cols.amount_released),
            ],
        );
    }
    out.into_bytes()
}
