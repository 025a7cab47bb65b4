pub mod backfill;
pub mod download;
pub mod entitlement;
pub mod storage;
