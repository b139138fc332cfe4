pub mod datastore;
pub mod logging;
pub mod random;
