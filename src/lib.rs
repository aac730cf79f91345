pub mod ballot_card;
pub mod best_fit;
pub mod debug;
pub mod election;
pub mod gap_scan;
pub mod geometry;
pub mod grid;
pub mod image_utils;
pub mod interpolate;
pub mod interpret;
pub mod metadata;
pub mod ovals;
pub mod timing_marks;
pub mod types;

#[cfg(test)]
mod test_utils;
