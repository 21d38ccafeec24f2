pub mod extractor;

pub use extractor::Operator;
