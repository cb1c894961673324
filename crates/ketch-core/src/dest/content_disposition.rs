//! Content-Disposition filename extraction (`filename` and `filename*`).

/// Pulls the filename out of a raw `Content-Disposition` value.
///
/// Handles `filename="quoted"`, bare `filename=token`, and RFC 5987
/// `filename*=UTF-8''percent-encoded`; the starred form wins when both are
/// present.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for param in value.split(';') {
        let Some((name, raw)) = param.trim().split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let raw = raw.trim();

        if name == "filename*" {
            if let Some(encoded) = raw
                .strip_prefix("UTF-8''")
                .or_else(|| raw.strip_prefix("utf-8''"))
            {
                let decoded = percent_decode(encoded);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if name == "filename" {
            let unquoted = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
                unescape_quoted(&raw[1..raw.len() - 1])
            } else {
                raw.to_string()
            };
            if !unquoted.is_empty() {
                plain = Some(unquoted);
            }
        }
    }

    plain
}

/// Resolve `\"` and `\\` escapes inside a quoted-string value.
fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push(c);
                    out.push(next);
                }
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Percent-decode for the RFC 5987 value. Malformed escapes pass through.
fn percent_decode(input: &str) -> String {
    let mut out = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some([h, l]) = bytes.get(i + 1..i + 3) {
                if let (Some(h), Some(l)) = (hex_digit(*h), hex_digit(*l)) {
                    out.push(h << 4 | l);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
    }

    #[test]
    fn token_filename() {
        assert_eq!(
            filename_from_content_disposition("attachment; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
    }

    #[test]
    fn starred_form_decodes_and_wins() {
        assert_eq!(
            filename_from_content_disposition(
                "attachment; filename=\"fallback.bin\"; filename*=UTF-8''real%20name.dat"
            )
            .as_deref(),
            Some("real name.dat")
        );
    }

    #[test]
    fn escaped_quotes_inside_quoted_value() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="a\"b.txt""#).as_deref(),
            Some("a\"b.txt")
        );
    }

    #[test]
    fn no_filename_param() {
        assert_eq!(filename_from_content_disposition("inline"), None);
    }
}
