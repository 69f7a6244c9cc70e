//! Catalog entities: exercises and their rating aggregate.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// An exercise: starter code, model solution and rating aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeBlock {
    pub id: Uuid,
    pub code_block_name: String,
    pub initial_code: String,
    pub solution: String,
    /// Sum of all ratings
    pub total_rating: u64,
    /// Number of ratings
    pub num_ratings: u64,
}

/// Fields supplied when creating an exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCodeBlock {
    pub code_block_name: String,
    pub initial_code: String,
    pub solution: String,
}

impl NewCodeBlock {
    pub fn new(
        code_block_name: impl Into<String>,
        initial_code: impl Into<String>,
        solution: impl Into<String>,
    ) -> Self {
        Self {
            code_block_name: code_block_name.into(),
            initial_code: initial_code.into(),
            solution: solution.into(),
        }
    }
}

/// Average and count, as reported by the rating endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average_rating: f64,
    pub num_ratings: u64,
}

impl CodeBlock {
    pub fn new(fields: NewCodeBlock) -> Self {
        Self {
            id: Uuid::new_v4(),
            code_block_name: fields.code_block_name,
            initial_code: fields.initial_code,
            solution: fields.solution,
            total_rating: 0,
            num_ratings: 0,
        }
    }

    pub fn rating_summary(&self) -> RatingSummary {
        let average_rating = if self.num_ratings == 0 {
            0.0
        } else {
            self.total_rating as f64 / self.num_ratings as f64
        };
        RatingSummary {
            average_rating,
            num_ratings: self.num_ratings,
        }
    }

    /// Add one rating to the aggregate. Only 1..=5 is accepted.
    pub fn record_rating(&mut self, rating: i64) -> Result<RatingSummary, CatalogError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(CatalogError::InvalidRating(rating));
        }
        self.total_rating += rating as u64;
        self.num_ratings += 1;
        Ok(self.rating_summary())
    }
}

/// The starter exercises a fresh catalog is seeded with.
pub fn default_code_blocks() -> Vec<NewCodeBlock> {
    vec![
        NewCodeBlock::new(
            "Async case",
            "async function fetchData() { /* Your code here */ }",
            "async function fetchData() {}",
        ),
        NewCodeBlock::new(
            "Loop Example",
            "for (let i = 0; i < 10; i++) { console.log(i); }",
            "for (let i = 0; i < 10; i++) { console.log(i); }",
        ),
        NewCodeBlock::new(
            "Function Example",
            "function add(a, b) { return a + b; }",
            "function add(a, b) { return a + b; }",
        ),
        NewCodeBlock::new(
            "Array Manipulation",
            "let arr = [1, 2, 3]; arr.push(4);",
            "let arr = [1, 2, 3]; arr.push(4);",
        ),
    ]
}
