//! Safe SQL builders: identifiers from validated definitions only, values as parameters.

mod builder;
pub mod ddl;
mod filter;
pub mod integrity;
pub mod mutation;
pub mod params;
pub mod select;

pub use builder::*;
pub use filter::compile_where;
pub use mutation::RowValues;
pub use params::*;
