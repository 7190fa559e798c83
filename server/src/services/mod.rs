//! Domain services: persistence behind the `ChatStore` trait.

pub mod store;
