use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::ConversionError;

/// Clean converter output before rendering.
///
/// Converted documents tend to carry fixed pixel widths that fight the
/// renderer's page size. Those are dropped from the root element and
/// from `div` wrappers; styles anywhere else are left alone, as are
/// width attributes that live outside an inline style.
pub fn normalize_html(html: &str) -> Result<String, ConversionError> {
    let mut reader = Reader::from_str(html);
    reader.check_end_names(false);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let rewritten = strip_width_style(&e, depth == 0);
                depth += 1;
                writer.write_event(Event::Start(rewritten))?;
            }
            Event::Empty(e) => {
                let rewritten = strip_width_style(&e, depth == 0);
                writer.write_event(Event::Empty(rewritten))?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| ConversionError::Markup(quick_xml::Error::NonDecodable(Some(e.utf8_error()))))
}

fn strip_width_style(e: &BytesStart, is_root: bool) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let targeted = is_root || e.local_name().as_ref() == b"div";
    let mut out = BytesStart::new(name);

    for attr in e.attributes().with_checks(false).flatten() {
        if targeted && attr.key.as_ref() == b"style" {
            let style = attr.unescape_value().unwrap_or_default();
            if style.to_ascii_lowercase().contains("width") {
                out.push_attribute(("style", ""));
                continue;
            }
        }
        out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn root_width_style_is_cleared() {
        let out = normalize_html(r#"<html style="width: 600px"><body>x</body></html>"#).unwrap();
        assert_eq!(out, r#"<html style=""><body>x</body></html>"#);
    }

    #[test]
    fn div_width_styles_are_cleared_at_any_depth() {
        let input = r#"<html><body><div style="width:100%; color:red"><div style="max-width: 20em">t</div></div></body></html>"#;
        let out = normalize_html(input).unwrap();
        assert_eq!(
            out,
            r#"<html><body><div style=""><div style="">t</div></div></body></html>"#
        );
    }

    #[test]
    fn non_div_styles_survive() {
        let input = r#"<html><body><p style="width: 5cm">keep</p></body></html>"#;
        let out = normalize_html(input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn styles_without_width_survive_on_divs() {
        let input = r#"<html><body><div style="color: blue">t</div></body></html>"#;
        let out = normalize_html(input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn width_attributes_are_not_styles() {
        let input = r#"<html><body><div width="300">t</div></body></html>"#;
        let out = normalize_html(input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn self_closing_divs_are_handled() {
        let input = r#"<html><body><div style="width:1px"/></body></html>"#;
        let out = normalize_html(input).unwrap();
        assert_eq!(out, r#"<html><body><div style=""/></body></html>"#);
    }
}
