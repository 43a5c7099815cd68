pub mod pattern;
pub mod resolver;
