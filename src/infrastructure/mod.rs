// Infrastructure implementations for plantrace.

pub mod concurrency;
pub mod journal;
