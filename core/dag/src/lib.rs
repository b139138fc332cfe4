mod blockservice;
mod dag;
mod error;
mod resolver;
pub mod unixfs;

pub use blockservice::BlockService;
pub use dag::{DagService, Node};
pub use error::DagError;
pub use ipld_dagpb::{PbLink, PbNode};
pub use resolver::PathResolver;

#[cfg(test)]
mod tests;
