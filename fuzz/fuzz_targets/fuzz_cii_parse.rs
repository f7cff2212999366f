#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Errors are fine, panics are bugs.
        let _ = erechnung::cii::detect_profile(s);
        let _ = erechnung::cii::from_cii_xml(s);
    }
});
