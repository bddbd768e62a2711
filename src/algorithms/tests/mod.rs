// src/algorithms/tests/mod.rs

/// Tests for the sliding window log
mod sliding_window_tests;
