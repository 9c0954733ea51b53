use serde::{Deserialize, Serialize};
use validator::Validate;

/// One labeled text sample from the projects dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub created_on: String,
    pub title: String,
    pub description: String,
    pub tag: String,
}

impl Project {
    /// Text used for modeling: title and description joined.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Label applied when a tag is out of scope or too rare.
pub const OTHER_TAG: &str = "other";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictItem {
    #[validate(length(min = 1, message = "text must not be empty"))]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictPayload {
    #[validate(length(min = 1, message = "texts must not be empty"))]
    #[validate(nested)]
    pub texts: Vec<PredictItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub input_text: String,
    pub predicted_tag: String,
}
