use crate::domain::identity::Credential;
use crate::domain::transaction::{TransactionRequest, TransactionType};
use crate::error::{Result, ServiceError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One line of a request file.
#[derive(Debug, Deserialize)]
struct RequestRow {
    #[serde(rename = "type")]
    kind: TransactionType,
    user_id: String,
    account_id: String,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    reference: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

impl From<RequestRow> for TransactionRequest {
    fn from(row: RequestRow) -> Self {
        let mut request = TransactionRequest::new(
            row.user_id,
            row.account_id,
            row.amount,
            row.currency,
            row.kind,
            Credential::new(row.token),
        )
        .with_description(row.description)
        .with_reference(row.reference);
        for (key, value) in [("channel", row.channel), ("note", row.note)] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                request = request.with_metadata(key, value);
            }
        }
        request
    }
}

/// Reads transaction requests from a CSV source.
///
/// Whitespace is trimmed and trailing optional columns may be omitted.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one request per line; malformed lines come back as
    /// validation errors without stopping the stream.
    pub fn requests(self) -> impl Iterator<Item = Result<TransactionRequest>> {
        self.reader.into_deserialize::<RequestRow>().map(|row| {
            row.map(TransactionRequest::from)
                .map_err(|e| ServiceError::validation(format!("malformed request line: {}", e)))
        })
    }
}
