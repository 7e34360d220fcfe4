#![no_main]

use libfuzzer_sys::fuzz_target;
use stagehand::params::StagingParameters;

fuzz_target!(|data: &[u8]| {
    let Ok(url) = std::str::from_utf8(data) else {
        return;
    };

    let params = StagingParameters {
        nexus_url: url.to_string(),
        ..StagingParameters::default()
    };
    let _ = params.build();
});
