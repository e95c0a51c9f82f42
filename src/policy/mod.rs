//! Profile data model and store: permission masks, profiles, namespaces,
//! the namespace-partitioned catalog, and the document loader.

pub mod load;
pub mod namespace;
pub mod perms;
pub mod profile;
pub mod store;
