use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub rating: Option<i16>,
    pub text: Option<String>,
}
