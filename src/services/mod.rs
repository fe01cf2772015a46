pub mod policy;
pub mod proxy;
pub mod reconcile;
pub mod storage;
pub mod token;
