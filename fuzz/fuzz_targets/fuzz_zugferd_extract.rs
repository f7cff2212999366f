#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as PDF input, must not panic.
    let _ = erechnung::zugferd::extract_from_pdf(data);
    let _ = erechnung::pipeline::sniff(data);
});
