#![no_main]

use std::collections::HashMap;

use blockrun::{EncoderConfig, GorillaEncoderFactory, SegmentMetrics};
use libfuzzer_sys::fuzz_target;

const T0: i32 = 1_600_000_000;
const WINDOW: usize = 1024;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let factory =
        GorillaEncoderFactory::new(EncoderConfig::default(), SegmentMetrics::noop());
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();

    // Bytes are interpreted as (offset: u16 % WINDOW, value: f64) tuples.
    let mut model: HashMap<i32, u64> = HashMap::new();
    // Cap well under the u16 data point counter.
    for chunk in data.chunks(10).take(4000) {
        if chunk.len() < 10 {
            break;
        }
        let offset = u16::from_le_bytes([chunk[0], chunk[1]]) as usize % WINDOW;
        let ts = T0 + offset as i32;
        let value = f64::from_bits(u64::from_le_bytes(chunk[2..10].try_into().unwrap()));
        enc.add_data_point(ts, value).unwrap();
        model.insert(ts, value.to_bits());
    }

    let mut buf = vec![0.0f64; WINDOW];
    let distinct = enc.read_and_dedupe(&mut buf).unwrap();

    // Last writer wins per slot, and the distinct count matches the model.
    assert_eq!(distinct, model.len(), "distinct count mismatch");
    for (&ts, &bits) in &model {
        let slot = (ts - T0) as usize;
        assert_eq!(buf[slot].to_bits(), bits, "slot {slot} mismatch");
    }

    enc.free_segment();
});
