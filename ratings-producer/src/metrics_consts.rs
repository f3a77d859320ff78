pub const EVENTS_PUBLISHED: &str = "ratings_producer_events_published";
pub const PUBLISH_RETRIES: &str = "ratings_producer_publish_retries";
pub const PUBLISH_FAILURES: &str = "ratings_producer_publish_failures";
pub const CYCLES_COMPLETED: &str = "ratings_producer_cycles_completed";
pub const CYCLE_TIME: &str = "ratings_producer_cycle_time_ms";
