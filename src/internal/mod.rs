//! Internal implementation details, not part of the public API.

pub(crate) mod teardown;

pub(crate) use teardown::TeardownList;
