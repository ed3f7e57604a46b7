pub mod csv_helpers;
pub mod db_helpers;
pub mod push_helpers;
pub mod response_helpers;
pub mod sanitization_helpers;
pub mod upload_helpers;
