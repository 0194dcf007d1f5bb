mod common;

use common::strategies::*;
use daily_income_engine::config::BatchSizingConfig;
use daily_income_engine::execution::{choose_batch_size, BatchPlan};
use daily_income_engine::models::ShardLayout;
use proptest::prelude::*;

proptest! {
    /// Property: Every client lands in a shard of the layout
    #[test]
    fn shard_of_stays_in_range(client in client_id_strategy(), count in shard_count_strategy()) {
        let layout = ShardLayout::new(count);
        let shard = layout.shard_of(&client);
        prop_assert!(layout.contains(shard));
        prop_assert_eq!(shard, layout.shard_of(&client));
    }

    /// Property: Larger volumes never get smaller chunks
    #[test]
    fn batch_size_is_monotonic(
        config in batch_config_strategy(),
        a in pending_rows_strategy(),
        b in pending_rows_strategy(),
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(choose_batch_size(low, &config) <= choose_batch_size(high, &config));
    }

    /// Property: Chunk sizes stay within the configured bounds
    #[test]
    fn batch_size_is_bounded(total in pending_rows_strategy()) {
        let config = BatchSizingConfig::default();
        let size = choose_batch_size(total, &config);
        prop_assert!(size <= config.max_size);
        if total > config.min_size {
            prop_assert!(size >= config.default_size);
        } else {
            prop_assert_eq!(size, total);
        }
    }

    /// Property: Chunk windows cover every pending row exactly once
    #[test]
    fn windows_cover_all_rows(config in batch_config_strategy(), total in pending_rows_strategy()) {
        let plan = BatchPlan::for_total(total, &config);
        let mut next = 0;
        for (offset, len) in plan.windows() {
            prop_assert_eq!(offset, next);
            prop_assert!(len > 0);
            prop_assert!(len <= plan.batch_size);
            next = offset + len;
        }
        prop_assert_eq!(next, total);
        prop_assert_eq!(plan.windows().count(), plan.total_batches);
    }
}
