// Copyright 2024
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rendering of exported rows.
//!
//! Rows are comma separated with no header. A field is quoted only when it
//! has to be, so plain identifiers and numbers are written verbatim.

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Quote a single field if it contains the delimiter, a quote, a line break,
/// or starts with whitespace.
pub fn quote_field(value: &str) -> String {
    let needs_quoting = value.contains(DELIMITER)
        || value.contains(QUOTE)
        || value.contains('\n')
        || value.contains('\r')
        || value.starts_with(char::is_whitespace);

    if needs_quoting {
        let escaped = value.replace(QUOTE, "\"\"");
        format!("{}{}{}", QUOTE, escaped, QUOTE)
    } else {
        value.to_string()
    }
}

/// Render one output line, including the trailing newline.
pub fn encode_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        line.push_str(&quote_field(field.as_ref()));
    }
    line.push('\n');
    line
}

/// Fixed-point rendering with six fractional digits.
pub fn format_amount(amount: f64) -> String {
    if amount.is_nan() {
        "NaN".to_string()
    } else if amount.is_infinite() {
        if amount > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        format!("{:.6}", amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields_unquoted() {
        assert_eq!(encode_row(&["0", "1", "A"]), "0,1,A\n");
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_field("Smith, John"), "\"Smith, John\"");
        assert_eq!(quote_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(quote_field("two\nlines"), "\"two\nlines\"");
        assert_eq!(quote_field(" padded"), "\" padded\"");
        assert_eq!(quote_field("trailing "), "trailing ");
        assert_eq!(quote_field(""), "");
    }

    #[test]
    fn test_leading_whitespace_is_quoted() {
        assert_eq!(quote_field("\tAnn"), "\"\tAnn\"");
        assert_eq!(quote_field("\u{3000}Ann"), "\"\u{3000}Ann\"");
        assert_eq!(quote_field("Ann\t"), "Ann\t");
    }

    #[test]
    fn test_amount_format() {
        assert_eq!(format_amount(12.5), "12.500000");
        assert_eq!(format_amount(0.0), "0.000000");
        assert_eq!(format_amount(-3.1415926), "-3.141593");
        assert_eq!(format_amount(f64::INFINITY), "+Inf");
        assert_eq!(format_amount(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_amount(f64::NAN), "NaN");
    }
}
