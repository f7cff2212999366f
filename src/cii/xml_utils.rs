use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rust_decimal::Decimal;
use std::io::Cursor;

use chrono::NaiveDate;

use crate::core::{EInvoiceError, Result};

fn xml_io(e: std::io::Error) -> EInvoiceError {
    EInvoiceError::Xml(format!("write failed: {e}"))
}

/// Indenting element writer over an in-memory buffer.
pub(crate) struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    pub fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_io)?;
        Ok(Self { writer })
    }

    pub fn into_string(self) -> Result<String> {
        let buf = self.writer.into_inner().into_inner();
        String::from_utf8(buf).map_err(|e| EInvoiceError::Xml(format!("output is not UTF-8: {e}")))
    }

    pub fn start(&mut self, name: &str) -> Result<&mut Self> {
        self.start_with_attrs(name, &[])
    }

    pub fn start_with_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<&mut Self> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn end(&mut self, name: &str) -> Result<&mut Self> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn text(&mut self, name: &str, text: &str) -> Result<&mut Self> {
        self.text_with_attrs(name, text, &[])
    }

    pub fn text_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self> {
        self.start_with_attrs(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_io)?;
        self.end(name)
    }

    /// Write `text` only when present.
    pub fn opt_text(&mut self, name: &str, text: Option<&str>) -> Result<&mut Self> {
        if let Some(text) = text {
            self.text(name, text)?;
        }
        Ok(self)
    }

    pub fn decimal(&mut self, name: &str, value: Decimal) -> Result<&mut Self> {
        self.text(name, &format_decimal(value))
    }

    pub fn amount(&mut self, name: &str, amount: Decimal, currency: &str) -> Result<&mut Self> {
        self.text_with_attrs(name, &format_decimal(amount), &[("currencyID", currency)])
    }

    pub fn quantity(&mut self, name: &str, qty: Decimal, unit: &str) -> Result<&mut Self> {
        self.text_with_attrs(name, &format_decimal(qty), &[("unitCode", unit)])
    }

    /// `<name><udt:DateTimeString format="102">YYYYMMDD</udt:DateTimeString></name>`
    pub fn date(&mut self, name: &str, date: NaiveDate) -> Result<&mut Self> {
        self.start(name)?;
        self.text_with_attrs(
            "udt:DateTimeString",
            &date.format("%Y%m%d").to_string(),
            &[("format", "102")],
        )?;
        self.end(name)
    }

    /// Same as [`XmlWriter::date`] with the qualified data type used by
    /// `FormattedIssueDateTime`.
    pub fn formatted_date(&mut self, name: &str, date: NaiveDate) -> Result<&mut Self> {
        self.start(name)?;
        self.text_with_attrs(
            "qdt:DateTimeString",
            &date.format("%Y%m%d").to_string(),
            &[("format", "102")],
        )?;
        self.end(name)
    }
}

/// Format a Decimal for XML output with at least 2 decimal places and
/// no trailing zeros beyond that.
pub(crate) fn format_decimal(d: Decimal) -> String {
    let s = d.normalize().to_string();
    match s.find('.') {
        Some(dot) => {
            let decimals = s.len() - dot - 1;
            if decimals < 2 {
                format!("{s}{}", "0".repeat(2 - decimals))
            } else {
                s
            }
        }
        None => format!("{s}.00"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn format_decimal_cases() {
        assert_eq!(format_decimal(dec!(100)), "100.00");
        assert_eq!(format_decimal(dec!(1500.0)), "1500.00");
        assert_eq!(format_decimal(dec!(49.90)), "49.90");
        assert_eq!(format_decimal(dec!(0.005)), "0.005");
        assert_eq!(format_decimal(dec!(-20)), "-20.00");
    }

    #[test]
    fn dates_use_format_102() {
        let mut w = XmlWriter::new().unwrap();
        w.date("ram:IssueDateTime", NaiveDate::from_ymd_opt(2024, 6, 15).unwrap())
            .unwrap();
        let xml = w.into_string().unwrap();
        assert!(xml.contains(r#"<udt:DateTimeString format="102">20240615</udt:DateTimeString>"#));
    }
}
