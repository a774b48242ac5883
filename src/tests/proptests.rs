use proptest::prelude::*;
use std::collections::HashMap;

use crate::metrics::SegmentMetrics;
use crate::{EncoderConfig, GorillaEncoderFactory};

const T0: i32 = 1_600_000_000;

/// Seconds in the segment window used by dedupe properties.
const WINDOW: usize = 1024;

fn factory(block_size_bytes: usize, lossy: bool) -> GorillaEncoderFactory {
    let config = EncoderConfig {
        lossy,
        block_size_bytes,
        ..EncoderConfig::default()
    };
    GorillaEncoderFactory::new(config, SegmentMetrics::noop())
}

prop_compose! {
    /// Strictly monotonic series inside the window: positive deltas and
    /// arbitrary bit patterns for values.
    fn arb_monotonic_series()(
        count in 1usize..200,
    )(
        deltas in prop::collection::vec(1i32..5, count),
        values in prop::collection::vec(prop::num::f64::ANY, count),
    ) -> Vec<(i32, f64)> {
        let mut ts = T0;
        deltas.iter().zip(values.iter()).enumerate()
            .map(|(i, (&d, &v))| {
                if i > 0 {
                    ts += d;
                }
                (ts, v)
            })
            .collect()
    }
}

prop_compose! {
    /// Series with duplicates and reordering: every timestamp stays inside
    /// the window, order is arbitrary.
    fn arb_unordered_series()(
        count in 1usize..200,
    )(
        offsets in prop::collection::vec(0i32..WINDOW as i32, count),
        values in prop::collection::vec(prop::num::f64::ANY, count),
    ) -> Vec<(i32, f64)> {
        offsets.iter().zip(values.iter())
            .map(|(&off, &v)| (T0 + off, v))
            .collect()
    }
}

proptest! {
    /// Property: a strictly monotonic series reads back bit-exact, in order.
    #[test]
    fn prop_monotonic_roundtrip(series in arb_monotonic_series()) {
        let factory = factory(256, false);
        let mut enc = factory.create();
        enc.create_segment(T0).unwrap();
        for &(ts, v) in &series {
            enc.add_data_point(ts, v).unwrap();
        }

        let mut decoded = Vec::new();
        enc.read(|ts, v| decoded.push((ts, v))).unwrap();

        prop_assert_eq!(decoded.len(), series.len());
        for (i, (&(ets, ev), &(dts, dv))) in series.iter().zip(decoded.iter()).enumerate() {
            prop_assert_eq!(ets, dts, "timestamp mismatch at {}", i);
            prop_assert_eq!(ev.to_bits(), dv.to_bits(), "value mismatch at {}", i);
        }
        enc.free_segment();
    }

    /// Property: small blocks only change the chain shape, never the data.
    #[test]
    fn prop_roundtrip_independent_of_block_size(series in arb_monotonic_series()) {
        let mut reference: Option<Vec<(i32, u64)>> = None;
        for block_size in [64usize, 128, 1024] {
            let factory = factory(block_size, false);
            let mut enc = factory.create();
            enc.create_segment(T0).unwrap();
            for &(ts, v) in &series {
                enc.add_data_point(ts, v).unwrap();
            }
            let mut decoded = Vec::new();
            enc.read(|ts, v| decoded.push((ts, v.to_bits()))).unwrap();
            enc.free_segment();

            match &reference {
                None => reference = Some(decoded),
                Some(expected) => prop_assert_eq!(expected, &decoded),
            }
        }
    }

    /// Property: dedupe keeps the last value written per distinct second and
    /// returns the distinct count.
    #[test]
    fn prop_dedupe_matches_model(series in arb_unordered_series()) {
        let factory = factory(256, false);
        let mut enc = factory.create();
        enc.create_segment(T0).unwrap();

        let mut model: HashMap<i32, u64> = HashMap::new();
        for &(ts, v) in &series {
            enc.add_data_point(ts, v).unwrap();
            model.insert(ts, v.to_bits());
        }

        let mut buf = vec![0.0f64; WINDOW];
        let distinct = enc.read_and_dedupe(&mut buf).unwrap();
        prop_assert_eq!(distinct, model.len());
        for (&ts, &bits) in &model {
            let slot = (ts - T0) as usize;
            prop_assert_eq!(buf[slot].to_bits(), bits, "slot {} diverged", slot);
        }
        enc.free_segment();
    }

    /// Property: the out-of-order flag is set iff some sample arrived at or
    /// before its predecessor.
    #[test]
    fn prop_ooo_flag_matches_definition(series in arb_unordered_series()) {
        let factory = factory(256, false);
        let mut enc = factory.create();
        enc.create_segment(T0).unwrap();
        for &(ts, v) in &series {
            enc.add_data_point(ts, v).unwrap();
        }

        let expected = series.windows(2).any(|w| w[1].0 <= w[0].0);
        prop_assert_eq!(enc.segment_has_out_of_order_or_duplicates(), expected);
        enc.free_segment();
    }

    /// Property: serialization_length is exactly the bytes serialize writes.
    #[test]
    fn prop_serialization_length_exact(series in arb_unordered_series()) {
        let factory = factory(128, false);
        let mut enc = factory.create();
        enc.create_segment(T0).unwrap();
        for &(ts, v) in &series {
            enc.add_data_point(ts, v).unwrap();
        }

        let expected = enc.serialization_length();
        let mut first = vec![0xAAu8; expected + 32];
        let mut second = vec![0x55u8; expected + 32];
        let len = first.len();
        enc.serialize(&mut first, 0, len);
        enc.serialize(&mut second, 0, len);
        prop_assert!(first[expected..].iter().all(|&b| b == 0xAA));
        prop_assert_eq!(&first[..expected], &second[..expected]);
        // The final payload byte exists whenever any sample was written.
        if !series.is_empty() {
            prop_assert!(expected > 2);
        }
        enc.free_segment();
    }

    /// Property: reopening mid-session and appending the rest produces the
    /// same stream as one uninterrupted session.
    #[test]
    fn prop_reopen_resumes_exactly(series in arb_monotonic_series(), split in 0usize..200) {
        let split = split.min(series.len());
        let factory = factory(256, false);

        let mut oneshot = factory.create();
        oneshot.create_segment(T0).unwrap();
        for &(ts, v) in &series {
            oneshot.add_data_point(ts, v).unwrap();
        }
        let mut expected = Vec::new();
        oneshot.read(|ts, v| expected.push((ts, v.to_bits()))).unwrap();

        let mut first = factory.create();
        let address = first.create_segment(T0).unwrap();
        for &(ts, v) in &series[..split] {
            first.add_data_point(ts, v).unwrap();
        }
        first.update_header();
        let dirty_before = first.segment_is_dirty();
        let ooo_before = first.segment_has_out_of_order_or_duplicates();
        drop(first);

        let mut second = factory.create();
        second.open_segment(address);
        prop_assert_eq!(second.segment_is_dirty(), dirty_before);
        prop_assert_eq!(second.segment_has_out_of_order_or_duplicates(), ooo_before);
        for &(ts, v) in &series[split..] {
            second.add_data_point(ts, v).unwrap();
        }

        let mut resumed = Vec::new();
        second.read(|ts, v| resumed.push((ts, v.to_bits()))).unwrap();
        prop_assert_eq!(expected, resumed);

        second.free_segment();
        oneshot.free_segment();
    }

    /// Property: lossy decoding returns exactly the mantissa-truncated input.
    #[test]
    fn prop_lossy_truncates_mantissa(series in arb_monotonic_series()) {
        let factory = factory(256, true);
        let mut enc = factory.create();
        enc.create_segment(T0).unwrap();
        for &(ts, v) in &series {
            enc.add_data_point(ts, v).unwrap();
        }

        let mut decoded = Vec::new();
        enc.read(|_, v| decoded.push(v.to_bits())).unwrap();
        prop_assert_eq!(decoded.len(), series.len());
        for (i, (&(_, v), &bits)) in series.iter().zip(decoded.iter()).enumerate() {
            prop_assert_eq!(
                bits,
                v.to_bits() & crate::constants::LOSSY_MANTISSA_MASK,
                "lossy mismatch at {}",
                i
            );
        }
        enc.free_segment();
    }
}
