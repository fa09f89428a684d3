#![no_main]

use libfuzzer_sys::fuzz_target;
use modtree::descriptor::Descriptor;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = serde_json::from_str::<Descriptor>(text);
    }
});
