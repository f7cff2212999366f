//! Plain text from the HTML fragments ERP text editors produce.

/// Strip tags, turn block ends into line breaks and decode entities.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('>') else {
            // unterminated tag, keep the text as is
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let tag = rest[start + 1..start + len].trim().to_ascii_lowercase();
        if is_line_break(&tag) {
            out.push('\n');
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);

    let decoded = decode_entities(&out);
    let mut lines: Vec<&str> = decoded.lines().map(str::trim).collect();
    lines.dedup_by(|a, b| a.is_empty() && b.is_empty());
    lines.join("\n").trim().to_string()
}

fn is_line_break(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("");
    match name {
        "br" => true,
        "p" | "div" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            tag.starts_with('/')
        }
        _ => false,
    }
}

fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        match tail.find(';').filter(|&end| end <= 10) {
            Some(end) => {
                match decode_entity(&tail[1..end]) {
                    Some(c) => out.push(c),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_breaks_blocks() {
        let html = "<div><p>Zahlbar <b>sofort</b></p><p>ohne Abzug</p></div>";
        assert_eq!(html_to_text(html), "Zahlbar sofort\nohne Abzug");
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(html_to_text("M&amp;M &lt;3&gt; &#228;&#x00FC;"), "M&M <3> äü");
        assert_eq!(html_to_text("a & b"), "a & b");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(html_to_text("Beratung"), "Beratung");
        assert_eq!(html_to_text("a<br>b<br/>c"), "a\nb\nc");
    }
}
