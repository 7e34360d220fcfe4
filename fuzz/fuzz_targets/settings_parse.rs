#![no_main]

use libfuzzer_sys::fuzz_target;
use stagehand::settings::{Settings, select_proxy};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(settings) = toml::from_str::<Settings>(text) else {
        return;
    };
    let _ = select_proxy(&settings.proxies, "https://oss.example.org/", false);
    let _ = select_proxy(&settings.proxies, "http://oss.example.org/", true);
});
