pub mod authorize;
pub mod callback;
pub mod health;
pub mod objects;
pub mod proxy;
