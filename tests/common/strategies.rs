use proptest::prelude::*;

use daily_income_engine::config::BatchSizingConfig;

/// Strategy for generating client identifiers
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9]{0,15}"
}

/// Strategy for generating shard counts of realistic deployments
pub fn shard_count_strategy() -> impl Strategy<Value = u32> {
    1u32..=64
}

/// Strategy for generating pending row counts across every staircase step
pub fn pending_rows_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![0usize..=200, 0usize..=20_000, 0usize..=250_000]
}

/// Strategy for generating ordered staircase configurations
pub fn batch_config_strategy() -> impl Strategy<Value = BatchSizingConfig> {
    (
        1usize..=500,
        1usize..=2000,
        1usize..=5000,
        1usize..=20_000,
        1usize..=50_000,
        1usize..=100_000,
    )
        .prop_map(|(min, default_extra, max_extra, small, medium_extra, large_extra)| {
            let default_size = min + default_extra;
            let max_size = default_size + max_extra;
            let medium = small + medium_extra;
            BatchSizingConfig {
                min_size: min,
                default_size,
                max_size,
                small,
                medium,
                large: medium + large_extra,
                medium_batch_size: default_size.max(max_size / 2),
                large_batch_size: max_size,
            }
        })
}
