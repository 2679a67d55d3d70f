pub mod json;
pub mod serialization;

pub use json::{first_json_array, parse_object_array};
pub use serialization::{validate_result, OutputFormat, ResultSerializer};
