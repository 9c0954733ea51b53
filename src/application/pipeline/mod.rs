pub mod classifier;
pub mod evaluation;
pub mod preprocess;
pub mod vectorizer;
