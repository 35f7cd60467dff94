//! Memoflight.
//!
//! A command line tool driving [`memoflight::Memo`] caches: it downloads lists of URLs
//! through a cache, and runs configurable concurrent workloads against caches to measure
//! their throughput and latency.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod fetch;
mod logging;
mod stresstest;
mod workloads;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
