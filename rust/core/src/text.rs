// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text content cleanup: control codes and MTEXT inline formatting

/// Replace `%%` control codes and `\U+XXXX` escapes with their characters
pub fn decode_special_codes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '%' && i + 2 < chars.len() && chars[i + 1] == '%' {
            let replacement = match chars[i + 2].to_ascii_lowercase() {
                'c' => Some('Ø'),
                'd' => Some('°'),
                'p' => Some('±'),
                '%' => Some('%'),
                // underline/overline toggles
                'u' | 'o' => None,
                _ => {
                    out.push(c);
                    i += 1;
                    continue;
                }
            };
            if let Some(r) = replacement {
                out.push(r);
            }
            i += 3;
            continue;
        }
        if c == '\\' && matches_unicode_escape(&chars[i..]) {
            let hex: String = chars[i + 3..i + 7].iter().collect();
            if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                out.push(decoded);
                i += 7;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

fn matches_unicode_escape(chars: &[char]) -> bool {
    chars.len() >= 7
        && chars[1].eq_ignore_ascii_case(&'u')
        && chars[2] == '+'
        && chars[3..7].iter().all(|c| c.is_ascii_hexdigit())
}

/// Reduce MTEXT content to plain text.
///
/// Paragraph breaks become spaces, property codes (`\f..;`, `\H..;`, ...)
/// are dropped, stacked fractions `\Sa^b;` become `a/b`, grouping braces are
/// removed and whitespace is collapsed.
pub fn strip_mtext_formatting(raw: &str) -> String {
    let decoded = decode_special_codes(raw);
    let chars: Vec<char> = decoded.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' | '}' => {
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                let code = chars[i + 1];
                match code {
                    'P' | 'X' | '~' => {
                        out.push(' ');
                        i += 2;
                    }
                    '\\' | '{' | '}' => {
                        out.push(code);
                        i += 2;
                    }
                    'L' | 'l' | 'O' | 'o' | 'K' | 'k' => {
                        i += 2;
                    }
                    'S' => {
                        // stacked fraction up to ';'
                        let end = find_semicolon(&chars, i + 2);
                        let stacked: String = chars[i + 2..end].iter().collect();
                        out.push_str(&stacked.replace(['^', '#'], "/"));
                        i = end + 1;
                    }
                    'f' | 'F' | 'H' | 'A' | 'C' | 'c' | 'T' | 'Q' | 'W' | 'p' => {
                        i = find_semicolon(&chars, i + 2) + 1;
                    }
                    _ => {
                        out.push(code);
                        i += 2;
                    }
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_semicolon(chars: &[char], from: usize) -> usize {
    chars[from.min(chars.len())..]
        .iter()
        .position(|&c| c == ';')
        .map(|p| from + p)
        .unwrap_or(chars.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_codes() {
        assert_eq!(decode_special_codes("%%c110"), "Ø110");
        assert_eq!(decode_special_codes("90%%d"), "90°");
        assert_eq!(decode_special_codes("BA\\U+00D1O"), "BAÑO");
        assert_eq!(decode_special_codes("50%"), "50%");
    }

    #[test]
    fn test_mtext_stripping() {
        assert_eq!(
            strip_mtext_formatting("{\\fArial|b1|i0;\\H2.5;SALA}\\PESTAR"),
            "SALA ESTAR"
        );
        assert_eq!(strip_mtext_formatting("\\S1^2; PULG"), "1/2 PULG");
        assert_eq!(strip_mtext_formatting("\\LV-01\\l"), "V-01");
        assert_eq!(strip_mtext_formatting("a\\\\b"), "a\\b");
    }
}
