//! Frame validation (C7) and on-disk partition validity proof (C9).

pub mod dq;
pub mod partition_audit;
