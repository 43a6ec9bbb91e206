pub mod echo;
pub mod http_request;
pub mod json_query;
