//! Shared utilities for orcid-sync integration tests.
//!
//! - `FakeOrcid`: an in-process stand-in for the ORCID token, search and
//!   member endpoints plus the ROR registry
//! - `TestHarness`: in-memory database and a scheduler wired to the fake
//! - `FailingStore`: a store wrapper that fails chosen upserts

pub mod failing_store;
pub mod fake_orcid;
pub mod harness;

pub use failing_store::FailingStore;
pub use fake_orcid::{FakeOrcid, FakeProfile, FakeRecord};
pub use harness::TestHarness;
