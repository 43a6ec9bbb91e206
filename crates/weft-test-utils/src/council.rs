use std::sync::Mutex;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::CouncilClient;
use weft_core::types::{CouncilResponse, CouncilResult};

/// Council that answers every model with a canned response, or always fails.
pub struct MockCouncil {
    answer: std::result::Result<String, String>,
    queries: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockCouncil {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            answer: Err(error.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Prompts and model lists received so far.
    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.queries.lock().unwrap().clone()
    }
}

impl CouncilClient for MockCouncil {
    fn query(&self, prompt: String, models: Vec<String>) -> BoxFuture<'_, Result<CouncilResult>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push((prompt, models.clone()));
            let answer = self.answer.clone().map_err(WeftError::Council)?;
            Ok(CouncilResult {
                responses: models
                    .into_iter()
                    .map(|model| CouncilResponse {
                        model,
                        response: Some(answer.clone()),
                        error: None,
                    })
                    .collect(),
            })
        })
    }
}
