//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, settings and snapshots that
//! exercise deduplication: natural keys are drawn from a small pool and
//! rendered with optional leading zeros and padding, so batches routinely
//! contain several spellings of one key.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use rollsync_model::{Record, Settings, SettingsEntry, Snapshot};
use serde_json::{json, Value};

/// Strategy for general-register numbers, as they are typed in by hand.
///
/// Draws from `1..=pool` and adds leading zeros or surrounding spaces.
pub fn gr_no_strategy(pool: u32) -> impl Strategy<Value = String> {
    (1..=pool.max(1), 0usize..3, any::<bool>()).prop_map(|(n, zeros, padded)| {
        let raw = format!("{}{n}", "0".repeat(zeros));
        if padded {
            format!(" {raw} ")
        } else {
            raw
        }
    })
}

/// Strategy for a field value: mostly short strings, sometimes empty or null.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        6 => "[A-Za-z ]{1,12}".prop_map(Value::from),
        2 => (0i64..10_000).prop_map(Value::from),
        1 => Just(Value::String(String::new())),
        1 => Just(Value::Null),
    ]
}

/// Strategy for a student record keyed from a pool of `pool` numbers.
pub fn student_strategy(pool: u32) -> impl Strategy<Value = Record> {
    (
        gr_no_strategy(pool),
        field_value_strategy(),
        field_value_strategy(),
        field_value_strategy(),
        prop::option::of(prop_oneof![Just("1234 5678 9012"), Just("9999 0000 1111")]),
    )
        .prop_map(|(gr_no, name, class, phone, aadhar)| {
            let mut record = Record::new()
                .with("grNo", gr_no)
                .with("name", name)
                .with("class", class)
                .with("phone", phone);
            if let Some(aadhar) = aadhar {
                record.insert("aadharNo", Value::from(aadhar));
            }
            record
        })
}

/// Strategy for a batch of student records, some of them unkeyed.
pub fn student_batch_strategy(pool: u32, max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(
        prop_oneof![
            9 => student_strategy(pool),
            1 => field_value_strategy().prop_map(|name| Record::new().with("name", name)),
        ],
        0..max_len.max(1),
    )
}

/// Strategy for timestamps within one school year.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 3600).prop_map(|offset| {
        Utc.timestamp_opt(1_717_200_000 + offset, 0)
            .single()
            .unwrap_or_default()
    })
}

/// Strategy for one settings entry: a scalar or a small object, stamped or
/// not.
pub fn settings_entry_strategy() -> impl Strategy<Value = SettingsEntry> {
    let value = prop_oneof![
        "[a-z]{1,8}".prop_map(Value::from),
        (0i64..100).prop_map(Value::from),
        prop::collection::btree_map("[a-c]", 0i64..10, 0..3)
            .prop_map(|map| json!(map)),
    ];
    (value, prop::option::of(timestamp_strategy())).prop_map(|(value, at)| SettingsEntry {
        value,
        updated_at: at,
    })
}

/// Strategy for a settings map over a small key space.
pub fn settings_strategy() -> impl Strategy<Value = Settings> {
    prop::collection::btree_map("[a-e]", settings_entry_strategy(), 0..5)
}

/// Strategy for a snapshot with a students collection and settings.
pub fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (student_batch_strategy(12, 16), settings_strategy()).prop_map(|(students, settings)| {
        let mut snapshot = Snapshot::new();
        snapshot.collections.insert("students".into(), students);
        snapshot.settings = settings;
        snapshot
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollsync_model::NaturalKey;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn gr_numbers_normalize_into_the_pool(raw in gr_no_strategy(5)) {
            let key = NaturalKey::parse(&raw);
            prop_assert!(key.is_some());
            let n: u32 = key.unwrap().as_str().parse().unwrap();
            prop_assert!((1..=5).contains(&n));
        }

        #[test]
        fn snapshots_serialize(snapshot in snapshot_strategy()) {
            let bytes = snapshot.to_json_bytes().unwrap();
            let back = Snapshot::from_json_bytes(&bytes).unwrap();
            prop_assert_eq!(back.collection("students").len(), snapshot.collection("students").len());
        }
    }
}
