//! Shared harness code for the scenario tests under `tests/tests/`
//! (teacher pattern: `ov6_integration_tests`' `src/lib.rs` + `tests/*.rs`
//! split, generalized from a QEMU-driven harness to an in-process one
//! since the WalB pipeline here runs as library code, not a guest OS).

pub mod support;
