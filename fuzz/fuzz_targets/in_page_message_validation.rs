#![no_main]

use libfuzzer_sys::fuzz_target;
use pdm_bridge::relay::validate_in_page_message;

/// Arbitrary bytes, parsed as JSON, handed straight to the content relay's
/// envelope validator. Must never panic regardless of shape: malformed or
/// hostile input has to come back as a `RelayError`, not a crash.
fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let _ = validate_in_page_message(&raw, "https://page.example");
    let _ = validate_in_page_message(&raw, "null");
});
