#![no_main]

use libfuzzer_sys::fuzz_target;
use scarebox::config::{ConfigPatch, Settings};

fuzz_target!(|data: &[u8]| {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(data) else {
        return;
    };
    let mut patch = ConfigPatch::parse(&map);
    let mut settings = Settings::default();
    patch.apply(&mut settings);
    // A patch may only ever produce a loadable configuration
    assert!(!settings.validate().has_errors());
});
