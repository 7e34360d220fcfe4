#![no_main]

use std::fs;

use libfuzzer_sys::fuzz_target;
use stagehand::store;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = store::identity_path(td.path());
    if fs::write(path, data).is_ok() {
        let _ = store::load(td.path());
    }
});
