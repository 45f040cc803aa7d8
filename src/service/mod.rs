//! Model layer: payload validation and generic CRUD over entity types.

mod model;
mod validation;
pub use model::{AssetModel, Model, TypedModel};
pub use validation::RequestValidator;
