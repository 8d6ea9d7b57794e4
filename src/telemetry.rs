use std::sync::Once;

use metrics::{Unit, describe_counter};

pub(crate) const METRIC_HIT: &str = "scorta_page_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "scorta_page_cache_miss_total";
pub(crate) const METRIC_STORE: &str = "scorta_page_cache_store_total";
pub(crate) const METRIC_REMOVE: &str = "scorta_page_cache_remove_total";
pub(crate) const METRIC_FLUSH: &str = "scorta_page_cache_flush_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Register metric descriptions with the host's recorder. Safe to call more
/// than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT,
            Unit::Count,
            "Total number of page cache hits served without rendering."
        );
        describe_counter!(
            METRIC_MISS,
            Unit::Count,
            "Total number of page cache misses on eligible requests."
        );
        describe_counter!(
            METRIC_STORE,
            Unit::Count,
            "Total number of captured pages persisted."
        );
        describe_counter!(
            METRIC_REMOVE,
            Unit::Count,
            "Total number of single-entry invalidations."
        );
        describe_counter!(
            METRIC_FLUSH,
            Unit::Count,
            "Total number of site-wide cache flushes."
        );
    });
}
