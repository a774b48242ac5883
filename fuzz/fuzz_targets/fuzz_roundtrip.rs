#![no_main]

use blockrun::{EncoderConfig, GorillaEncoderFactory, SegmentMetrics};
use libfuzzer_sys::fuzz_target;

const T0: i32 = 1_600_000_000;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Small blocks so the chain grows and boundary crossings get exercised.
    let config = EncoderConfig {
        block_size_bytes: 64,
        ..EncoderConfig::default()
    };
    let factory = GorillaEncoderFactory::new(config, SegmentMetrics::noop());
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();

    // Bytes are interpreted as (ts_step: i8, value: f64) tuples; steps may
    // be negative, producing out-of-order and duplicate samples.
    let mut appended = Vec::new();
    let mut ts = T0;
    // Cap well under the u16 data point counter.
    for chunk in data.chunks(9).take(4000) {
        if chunk.len() < 9 {
            break;
        }
        let step = i32::from(chunk[0] as i8);
        ts = (ts + step).clamp(T0, T0 + 8000);
        let value = f64::from_bits(u64::from_le_bytes(chunk[1..9].try_into().unwrap()));
        enc.add_data_point(ts, value).unwrap();
        appended.push((ts, value.to_bits()));
    }

    // Property 1: read() replays the exact sequence, in emission order.
    let mut decoded = Vec::new();
    enc.read(|t, v| decoded.push((t, v.to_bits()))).unwrap();
    assert_eq!(appended, decoded, "roundtrip mismatch");

    // Property 2: the ooo flag matches its definition.
    let expected_ooo = appended.windows(2).any(|w| w[1].0 <= w[0].0);
    assert_eq!(
        enc.segment_has_out_of_order_or_duplicates(),
        expected_ooo,
        "ooo flag mismatch"
    );

    enc.free_segment();
    assert_eq!(factory.allocator().outstanding_blocks(), 0, "block leak");
});
