pub mod prelude;

pub mod stored_objects;
