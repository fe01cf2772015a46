pub use super::stored_objects::Entity as StoredObjects;
