#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(map) = tracet_engine::skymap::load_map(data) {
        let spots = tracet_engine::skymap::pointings::ground_spots();
        let _ = tracet_engine::skymap::pointings::derive_pointings(&map, &spots);
    }
});
