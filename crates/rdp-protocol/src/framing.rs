//! Low-level length-prefixed field encoding shared by [`crate::writer`]
//! and [`crate::reader`].

/// Encode a single field as `LENGTH.VALUE`, where `LENGTH` is the
/// field's UTF-8 code-point count (not its byte length).
#[must_use]
pub fn encode_field(value: &str) -> String {
    format!("{}.{value}", value.chars().count())
}

/// Encode a complete instruction (opcode plus arguments) as a
/// comma-separated, semicolon-terminated list of length-prefixed
/// fields.
#[must_use]
pub fn encode_instruction(fields: &[String]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&encode_field(field));
    }
    out.push(';');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_field() {
        assert_eq!(encode_field("sync"), "4.sync");
    }

    #[test]
    fn counts_code_points_not_bytes() {
        // "é" is 2 bytes in UTF-8 but a single code point.
        assert_eq!(encode_field("é"), "1.é");
    }

    #[test]
    fn joins_fields_with_commas_and_terminates_with_semicolon() {
        let fields = vec!["rect".to_string(), "0".to_string(), "100".to_string()];
        assert_eq!(encode_instruction(&fields), "4.rect,1.0,3.100;");
    }
}
