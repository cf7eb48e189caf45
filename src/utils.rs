use crate::types::FieldId;
use core::fmt::Write;

pub(crate) trait FieldRanges {
    /// Renders a field list as compact comma-separated ranges, e.g. `1~3,7`.
    fn to_ranges(&self) -> String;
}

impl FieldRanges for [FieldId] {
    fn to_ranges(&self) -> String {
        let mut sorted: Vec<u32> = self.iter().map(|f| f.0).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let mut out = String::new();
        let mut iter = sorted.into_iter();
        let Some(first) = iter.next() else {
            return out;
        };
        let (mut lo, mut hi) = (first, first);
        let push = |out: &mut String, lo: u32, hi: u32| {
            if !out.is_empty() {
                out.push(',');
            }
            if lo == hi {
                write!(out, "{lo}").expect("FieldRanges::to_ranges: [1]");
            } else {
                write!(out, "{lo}~{hi}").expect("FieldRanges::to_ranges: [2]");
            }
        };
        for val in iter {
            if val == hi + 1 {
                hi = val;
            } else {
                push(&mut out, lo, hi);
                (lo, hi) = (val, val);
            }
        }
        push(&mut out, lo, hi);
        out
    }
}
