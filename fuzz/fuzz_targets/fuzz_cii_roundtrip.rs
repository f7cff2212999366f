#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Parse → serialize → parse must not panic at any step.
        if let Ok((profile, invoice)) = erechnung::cii::from_cii_xml(s) {
            if let Ok(xml) = erechnung::cii::to_cii_xml(&invoice, profile) {
                let _ = erechnung::cii::from_cii_xml(&xml);
            }
        }
    }
});
