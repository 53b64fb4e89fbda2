//! Property tests for bucketing determinism and merge invariance.

use std::collections::BTreeMap;

use proptest::prelude::*;

use chat_funnel_rollup::frame::{Frame, Value};
use chat_funnel_rollup::pipeline::bucket::{TimestampPolicy, UtcOffset, with_hour_buckets};
use chat_funnel_rollup::pipeline::merge::outer_merge;

const DATES: [&str; 3] = ["2024-01-01", "2024-01-02", "2024-02-29"];
const KEYS: &[&str] = &["date", "hour"];

/// One synthetic aggregate: unique bucket keys mapping to a count.
fn aggregate(metric: &str, entries: &BTreeMap<(usize, i64), i64>) -> Frame {
    let mut f = Frame::new(["date", "hour", metric]).unwrap();
    for (&(date_idx, hour), &n) in entries {
        f.push_row(vec![
            Value::Str(DATES[date_idx].into()),
            Value::Int(hour),
            Value::Int(n),
        ])
        .unwrap();
    }
    f
}

fn entries() -> impl Strategy<Value = BTreeMap<(usize, i64), i64>> {
    proptest::collection::btree_map((0usize..DATES.len(), 0i64..6), 0i64..50, 0..6)
}

fn cells(frame: &Frame) -> Vec<Vec<Value>> {
    frame.rows().map(<[Value]>::to_vec).collect()
}

proptest! {
    #[test]
    fn bucketing_twice_is_identical(
        secs in 0i64..4_102_444_800,
        hours in -12i32..=12,
        minutes in 0i32..60,
    ) {
        let offset = UtcOffset::new(hours, minutes);
        let mut f = Frame::new(["event_time"]).unwrap();
        f.push_row(vec![Value::Int(secs)]).unwrap();

        let a = with_hour_buckets(&f, "event_time", offset, TimestampPolicy::Fail).unwrap();
        let b = with_hour_buckets(&f, "event_time", offset, TimestampPolicy::Fail).unwrap();
        prop_assert_eq!(a.get(0, "date").unwrap(), b.get(0, "date").unwrap());
        prop_assert_eq!(a.get(0, "hour").unwrap(), b.get(0, "hour").unwrap());

        let Value::Int(hour) = a.get(0, "hour").unwrap() else {
            panic!("hour is not an integer");
        };
        prop_assert!((0..24).contains(hour));
    }

    #[test]
    fn merge_is_permutation_invariant(
        a in entries(),
        b in entries(),
        c in entries(),
    ) {
        let fa = aggregate("a", &a);
        let fb = aggregate("b", &b);
        let fc = aggregate("c", &c);

        let canonical = &["date", "hour", "a", "b", "c"];
        let baseline = outer_merge(&[fa.clone(), fb.clone(), fc.clone()], KEYS)
            .unwrap()
            .select(canonical)
            .unwrap();

        for order in [
            [&fa, &fc, &fb],
            [&fb, &fa, &fc],
            [&fc, &fb, &fa],
        ] {
            let frames: Vec<Frame> = order.iter().map(|f| (*f).clone()).collect();
            let merged = outer_merge(&frames, KEYS).unwrap().select(canonical).unwrap();
            prop_assert_eq!(cells(&merged), cells(&baseline));
        }
    }
}
