//! Size heuristics for cached values.
//!
//! Used when `put` is called without an explicit size. The estimates count
//! heap payload plus the inline size of the container; they are meant for
//! budgeting, not exact accounting.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::mem::size_of;

/// Approximate memory footprint of a value in bytes.
pub trait EstimateSize {
    fn estimate_size(&self) -> u64;
}

macro_rules! inline_size {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EstimateSize for $ty {
                fn estimate_size(&self) -> u64 {
                    size_of::<$ty>() as u64
                }
            }
        )*
    };
}

inline_size!(bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl EstimateSize for str {
    fn estimate_size(&self) -> u64 {
        self.len() as u64
    }
}

impl EstimateSize for String {
    fn estimate_size(&self) -> u64 {
        (size_of::<String>() + self.len()) as u64
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimate_size(&self) -> u64 {
        size_of::<Vec<T>>() as u64 + self.iter().map(EstimateSize::estimate_size).sum::<u64>()
    }
}

impl<T: EstimateSize> EstimateSize for VecDeque<T> {
    fn estimate_size(&self) -> u64 {
        size_of::<VecDeque<T>>() as u64 + self.iter().map(EstimateSize::estimate_size).sum::<u64>()
    }
}

impl<T: EstimateSize> EstimateSize for HashSet<T> {
    fn estimate_size(&self) -> u64 {
        size_of::<HashSet<T>>() as u64 + self.iter().map(EstimateSize::estimate_size).sum::<u64>()
    }
}

impl<K: EstimateSize, V: EstimateSize> EstimateSize for HashMap<K, V> {
    fn estimate_size(&self) -> u64 {
        size_of::<HashMap<K, V>>() as u64
            + self
                .iter()
                .map(|(k, v)| k.estimate_size() + v.estimate_size())
                .sum::<u64>()
    }
}

impl<K: EstimateSize, V: EstimateSize> EstimateSize for BTreeMap<K, V> {
    fn estimate_size(&self) -> u64 {
        size_of::<BTreeMap<K, V>>() as u64
            + self
                .iter()
                .map(|(k, v)| k.estimate_size() + v.estimate_size())
                .sum::<u64>()
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimate_size(&self) -> u64 {
        match self {
            Some(value) => value.estimate_size(),
            None => size_of::<Option<T>>() as u64,
        }
    }
}

impl<T: EstimateSize> EstimateSize for Box<T> {
    fn estimate_size(&self) -> u64 {
        size_of::<Box<T>>() as u64 + (**self).estimate_size()
    }
}

impl EstimateSize for serde_json::Value {
    fn estimate_size(&self) -> u64 {
        use serde_json::Value;

        let inline = size_of::<Value>() as u64;
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => inline,
            Value::String(s) => inline + s.len() as u64,
            Value::Array(items) => {
                inline + items.iter().map(EstimateSize::estimate_size).sum::<u64>()
            }
            Value::Object(map) => {
                inline
                    + map
                        .iter()
                        .map(|(k, v)| k.len() as u64 + v.estimate_size())
                        .sum::<u64>()
            }
        }
    }
}
