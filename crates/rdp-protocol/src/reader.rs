//! Incremental parsing of length-prefixed instructions off an async
//! byte stream.
//!
//! A naive implementation would read up to the next `;` — but a
//! length-prefixed field may legally contain a literal `;` or `,` as
//! part of its value (a clipboard paste, a window title). The length
//! prefix is the only thing that tells us where a field actually ends,
//! so it has to be honored byte-by-byte.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::GatewayError;

/// Read one complete instruction from `stream` and return its decoded
/// fields (`fields[0]` is the opcode). Returns `Ok(None)` on a clean
/// EOF between instructions (the peer closed the connection).
///
/// # Errors
///
/// Returns [`GatewayError::Protocol`] for a malformed length prefix, an
/// invalid UTF-8 field, or a missing separator, and
/// [`GatewayError::Transport`] for any underlying I/O failure.
pub async fn read_instruction<R>(stream: &mut R) -> Result<Option<Vec<String>>, GatewayError>
where
    R: AsyncRead + Unpin,
{
    let Some(first) = read_byte(stream).await? else {
        return Ok(None);
    };

    let mut fields = Vec::new();
    let mut pending = first;

    loop {
        let (value, next) = read_field(stream, pending).await?;
        fields.push(value);

        match next {
            b',' => {
                pending = read_byte_or_fail(stream).await?;
            }
            b';' => return Ok(Some(fields)),
            other => {
                return Err(GatewayError::Protocol(format!(
                    "expected ',' or ';' after field, got {:?}",
                    other as char
                )))
            }
        }
    }
}

/// Parse one `LENGTH.VALUE` field, given the first digit already read.
/// Returns the decoded value and the byte that terminated it (`,` or
/// `;`).
async fn read_field<R>(stream: &mut R, first_digit: u8) -> Result<(String, u8), GatewayError>
where
    R: AsyncRead + Unpin,
{
    let mut len: usize = 0;
    let mut digit = first_digit;

    loop {
        if !digit.is_ascii_digit() {
            return Err(GatewayError::Protocol(format!(
                "expected digit in length prefix, got {:?}",
                digit as char
            )));
        }
        len = len
            .checked_mul(10)
            .and_then(|v| v.checked_add((digit - b'0') as usize))
            .ok_or_else(|| GatewayError::Protocol("length prefix overflow".to_string()))?;

        digit = read_byte_or_fail(stream).await?;
        if digit == b'.' {
            break;
        }
    }

    let value = read_code_points(stream, len).await?;
    let terminator = read_byte_or_fail(stream).await?;
    Ok((value, terminator))
}

/// Read exactly `count` UTF-8 code points (not bytes) from `stream`.
async fn read_code_points<R>(stream: &mut R, count: usize) -> Result<String, GatewayError>
where
    R: AsyncRead + Unpin,
{
    if count == 0 {
        return Ok(String::new());
    }

    let mut buf = Vec::new();
    loop {
        buf.push(read_byte_or_fail(stream).await?);

        match std::str::from_utf8(&buf) {
            Ok(s) if s.chars().count() == count => return Ok(s.to_string()),
            Ok(_) => continue,
            Err(e) if e.error_len().is_none() => continue, // incomplete sequence at the tail
            Err(_) => return Err(GatewayError::Protocol("invalid UTF-8 in field".to_string())),
        }
    }
}

/// Read a single byte, translating a clean EOF to `None` and any other
/// I/O failure to [`GatewayError::Transport`].
async fn read_byte<R>(stream: &mut R) -> Result<Option<u8>, GatewayError>
where
    R: AsyncRead + Unpin,
{
    match stream.read_u8().await {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(GatewayError::Transport(e)),
    }
}

/// Read a single byte, treating EOF as a protocol error since it
/// occurred mid-instruction rather than between instructions.
async fn read_byte_or_fail<R>(stream: &mut R) -> Result<u8, GatewayError>
where
    R: AsyncRead + Unpin,
{
    read_byte(stream)
        .await?
        .ok_or_else(|| GatewayError::Protocol("connection closed mid-instruction".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_simple_instruction() {
        let mut input = "4.sync,1.0;".as_bytes();
        let fields = read_instruction(&mut input).await.unwrap().unwrap();
        assert_eq!(fields, vec!["sync".to_string(), "0".to_string()]);
    }

    #[tokio::test]
    async fn field_values_may_contain_literal_separators() {
        let mut input = "5.mouse,7.1,2;3,1.0;".as_bytes();
        let fields = read_instruction(&mut input).await.unwrap().unwrap();
        assert_eq!(fields, vec!["mouse".to_string(), "1,2;3".to_string(), "0".to_string()]);
    }

    #[tokio::test]
    async fn counts_code_points_not_bytes() {
        // "é" is 2 bytes in UTF-8 but a single code point.
        let mut input = "4.name,1.é;".as_bytes();
        let fields = read_instruction(&mut input).await.unwrap().unwrap();
        assert_eq!(fields, vec!["name".to_string(), "é".to_string()]);
    }

    #[tokio::test]
    async fn clean_eof_between_instructions_returns_none() {
        let mut input: &[u8] = &[];
        assert!(read_instruction(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_instruction_is_a_protocol_error() {
        let mut input = "4.syn".as_bytes();
        assert!(read_instruction(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn reads_multiple_instructions_back_to_back() {
        let mut input = "4.sync,1.0;4.sync,1.1;".as_bytes();
        let first = read_instruction(&mut input).await.unwrap().unwrap();
        let second = read_instruction(&mut input).await.unwrap().unwrap();
        assert_eq!(first, vec!["sync".to_string(), "0".to_string()]);
        assert_eq!(second, vec!["sync".to_string(), "1".to_string()]);
    }
}
