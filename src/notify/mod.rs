pub mod templates;

pub use templates::{Rendered, Template};
