//! Quoted, comma-delimited record splitting.
//!
//! Fields may be wrapped in double quotes, in which case they can contain
//! the delimiter. A doubled quote inside a quoted field is a literal quote.

use thiserror::Error;

/// Field delimiter used by the raw capture format.
pub const DELIMITER: char = ',';

const QUOTE: char = '"';

/// Errors from splitting a single record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The line ended while a quoted field was still open.
    #[error("unterminated quoted field")]
    UnterminatedQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the start of a field, nothing consumed yet.
    FieldStart,
    /// Inside an unquoted field.
    Unquoted,
    /// Inside a quoted field.
    Quoted,
    /// Just saw a quote while inside a quoted field: either the closing
    /// quote or the first half of an escaped `""`.
    QuoteInQuoted,
}

/// Split one raw line into its fields.
///
/// An empty line yields a single empty field, matching how a row with one
/// empty column is written.
pub fn split_record(line: &str) -> Result<Vec<String>, RecordError> {
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut fields = Vec::with_capacity(8);
    let mut current = String::new();
    let mut state = State::FieldStart;

    for c in line.chars() {
        state = match (state, c) {
            (State::FieldStart, QUOTE) => State::Quoted,
            (State::FieldStart | State::Unquoted, DELIMITER) => {
                fields.push(std::mem::take(&mut current));
                State::FieldStart
            }
            (State::FieldStart | State::Unquoted, c) => {
                current.push(c);
                State::Unquoted
            }
            (State::Quoted, QUOTE) => State::QuoteInQuoted,
            (State::Quoted, c) => {
                current.push(c);
                State::Quoted
            }
            (State::QuoteInQuoted, QUOTE) => {
                current.push(QUOTE);
                State::Quoted
            }
            (State::QuoteInQuoted, DELIMITER) => {
                fields.push(std::mem::take(&mut current));
                State::FieldStart
            }
            // Text after a closing quote is kept verbatim, as lenient CSV
            // readers do.
            (State::QuoteInQuoted, c) => {
                current.push(c);
                State::Unquoted
            }
        };
    }

    if state == State::Quoted {
        return Err(RecordError::UnterminatedQuote);
    }

    fields.push(current);
    Ok(fields)
}
