//! Exports CloudWatch metric samples to a Firehose delivery stream in
//! fixed five minute windows, checkpointing progress per metric in DynamoDB.

pub mod clock;
pub mod config;
pub mod fetcher;
pub mod handler;
pub mod metric;
pub mod processor;
pub mod runtime_api;
pub mod sink;
pub mod watermark;
pub mod window;

#[cfg(test)]
mod testing;
