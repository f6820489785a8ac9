use csv::{ByteRecord, ReaderBuilder, Trim};
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::recipient::NewRecipient;
use crate::outreach::store::RecipientStore;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub inserted: u64,
}

/// Parses an uploaded CSV into recipients.
///
/// The header row locates the `name` and `email` columns (case-insensitive).
/// Parsing is best-effort: a missing column or a short row yields an empty
/// string for that field rather than an error.
pub fn parse_recipients(bytes: &[u8]) -> Result<Vec<NewRecipient>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = reader.byte_headers()?.clone();
    let name_idx = column_index(&headers, "name");
    let email_idx = column_index(&headers, "email");

    let mut recipients = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        if record.len() == 1 && record[0].is_empty() {
            continue; // blank line
        }
        recipients.push(NewRecipient {
            name: field(&record, name_idx),
            email: field(&record, email_idx),
        });
    }
    Ok(recipients)
}

fn column_index(headers: &ByteRecord, wanted: &str) -> Option<usize> {
    headers.iter().position(|h| {
        String::from_utf8_lossy(h)
            .trim_start_matches('\u{feff}')
            .trim()
            .eq_ignore_ascii_case(wanted)
    })
}

fn field(record: &ByteRecord, idx: Option<usize>) -> String {
    idx.and_then(|i| record.get(i))
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .unwrap_or_default()
}

/// Parses the upload and inserts the whole batch in one call. Store errors
/// (including duplicate emails) propagate unchanged; nothing is retried or split.
pub async fn ingest_csv(store: &dyn RecipientStore, bytes: &[u8]) -> Result<IngestResponse, AppError> {
    let recipients = parse_recipients(bytes)
        .map_err(|e| AppError::Validation(format!("Could not parse CSV: {e}")))?;
    info!("Parsed {} recipient rows from upload", recipients.len());

    let inserted = store.insert_many(&recipients).await?;
    info!("Inserted {inserted} recipients");

    Ok(IngestResponse {
        message: "CSV data uploaded successfully!".to_string(),
        inserted,
    })
}
