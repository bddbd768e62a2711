// src/client/tests/mod.rs
