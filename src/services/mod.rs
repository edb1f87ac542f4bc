pub mod alternative_suggester;
pub mod compatibility;
pub mod conflict_detector;
pub mod recommender;
pub mod schedule_optimizer;
pub mod schedule_utils;
pub mod score_cache;
