#![no_main]

use blockrun::{EncoderConfig, GorillaEncoderFactory, SegmentMetrics};
use libfuzzer_sys::fuzz_target;

const T0: i32 = 1_600_000_000;

fuzz_target!(|data: &[u8]| {
    let config = EncoderConfig {
        block_size_bytes: 128,
        ..EncoderConfig::default()
    };
    let factory = GorillaEncoderFactory::new(config, SegmentMetrics::noop());
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();

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
    }
    enc.update_header();

    // Property 1: serialization_length is exactly what serialize writes.
    let expected = enc.serialization_length();
    let mut buf = vec![0xAAu8; expected + 64];
    let len = buf.len();
    enc.serialize(&mut buf, 0, len);
    assert!(
        buf[expected..].iter().all(|&b| b == 0xAA),
        "serialize wrote past serialization_length"
    );

    // Property 2: a shorter length yields a byte-identical prefix.
    if expected > 1 {
        let cut = expected / 2;
        let mut partial = vec![0x55u8; expected];
        enc.serialize(&mut partial, 0, cut);
        assert_eq!(&partial[..cut], &buf[..cut], "truncated prefix diverged");
        assert!(partial[cut..].iter().all(|&b| b == 0x55));
    }

    enc.free_segment();
});
