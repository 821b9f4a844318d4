#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use scarebox::config::{parse_settings, unknown_keys};

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml) = std::str::from_utf8(data) {
        let path = Path::new("fuzz.yaml");
        // Must not panic on any input
        if let Ok(settings) = parse_settings(yaml, path) {
            let _ = settings.validate();
        }
        let _ = unknown_keys(yaml, path);
    }
});
