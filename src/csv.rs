use serde::Deserialize;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Points;
use crate::engine::AccountSummary;
use crate::model::{AppointmentId, LedgerEvent, UserId};

/// Errors that can occur when reading events or writing balances
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open event file: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized event '{event}'")]
    UnrecognizedEvent { line: usize, event: String },

    #[error("line {line}: {event} missing {field}")]
    MissingField {
        line: usize,
        event: String,
        field: &'static str,
    },

    #[error("failed to write balance row: {0}")]
    Write(#[source] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    event: String,
    user: Option<UserId>,
    counterpart: Option<UserId>,
    appointment: Option<AppointmentId>,
    amount: Option<Points>,
    note: Option<String>,
}

impl InputRow {
    fn require<T>(&self, line: usize, field: &'static str, value: Option<T>) -> Result<T, CsvError> {
        value.ok_or_else(|| CsvError::MissingField {
            line,
            event: self.event.clone(),
            field,
        })
    }

    fn into_event(self, line: usize) -> Result<LedgerEvent, CsvError> {
        let event = match self.event.as_str() {
            "register" => {
                let user = self.require(line, "user", self.user)?;
                LedgerEvent::Register {
                    user,
                    name: self.note.unwrap_or_else(|| format!("user {user}")),
                    referrer: self.counterpart,
                }
            }
            "booking" => LedgerEvent::Booking {
                user: self.require(line, "user", self.user)?,
                appointment: self.require(line, "appointment", self.appointment)?,
            },
            "complete" => LedgerEvent::Complete {
                appointment: self.require(line, "appointment", self.appointment)?,
            },
            "cancel" => LedgerEvent::Cancel {
                appointment: self.require(line, "appointment", self.appointment)?,
            },
            "referral" => LedgerEvent::Referral {
                referrer: self.require(line, "user", self.user)?,
                referred: self.require(line, "counterpart", self.counterpart)?,
            },
            "spend" => LedgerEvent::Spend {
                user: self.require(line, "user", self.user)?,
                amount: self.require(line, "amount", self.amount)?,
                appointment: self.require(line, "appointment", self.appointment)?,
            },
            "manual" => LedgerEvent::Manual {
                user: self.require(line, "user", self.user)?,
                amount: self.require(line, "amount", self.amount)?,
                description: self
                    .note
                    .unwrap_or_else(|| "manual adjustment".to_string()),
            },
            other => {
                return Err(CsvError::UnrecognizedEvent {
                    line,
                    event: other.to_string(),
                });
            }
        };
        Ok(event)
    }
}

/// Read ledger events from a csv file with the header
/// `event,user,counterpart,appointment,amount,note`.
pub fn read_events(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<LedgerEvent, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_event(line)
        }))
}

/// Write `user,balance,pending` rows in csv format
pub fn write_balances<W: io::Write>(
    writer: W,
    rows: impl IntoIterator<Item = AccountSummary>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row).map_err(CsvError::Write)?;
    }
    writer.flush()?;
    Ok(())
}
