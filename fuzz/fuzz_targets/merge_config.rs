#![no_main]

use libfuzzer_sys::fuzz_target;
use modtree::descriptor::merge_config;

fuzz_target!(|data: &[u8]| {
    let mid = data.len() / 2;
    let (left, right) = data.split_at(mid);
    let (Ok(left_text), Ok(right_text)) = (std::str::from_utf8(left), std::str::from_utf8(right)) else {
        return;
    };
    let (Ok(base), Ok(over)) = (
        serde_json::from_str::<serde_json::Value>(left_text),
        serde_json::from_str::<serde_json::Value>(right_text),
    ) else {
        return;
    };
    let base_before = base.clone();
    let _ = merge_config(&base, &over);
    assert_eq!(base, base_before);
});
