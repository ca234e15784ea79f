//! Canned text/JSON responses and the echo transform

use crate::state::AppState;
use crate::{Request, Response, Result};
use serde::Serialize;
use std::sync::Arc;

/// Body of `GET /json`
#[derive(Debug, Serialize)]
pub struct Greeting {
    pub text: &'static str,
    pub numbers: [u8; 3],
}

/// Body of `GET /echo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    pub normal: String,
    pub shouty: String,
    pub character_count: usize,
    pub backwards: String,
}

impl Echo {
    /// Counting and reversal work on Unicode scalar values
    pub fn new(input: &str) -> Self {
        Self {
            normal: input.to_string(),
            shouty: input.to_uppercase(),
            character_count: input.chars().count(),
            backwards: input.chars().rev().collect(),
        }
    }
}

/// `GET /`
pub async fn index(_req: Request, _state: Arc<AppState>) -> Result<Response> {
    Ok(Response::text("hi"))
}

/// `GET /json`
pub async fn json(_req: Request, _state: Arc<AppState>) -> Result<Response> {
    Response::json_value(&Greeting {
        text: "hi",
        numbers: [1, 2, 3],
    })
}

/// `GET /echo?input=...`
pub async fn echo(req: Request, _state: Arc<AppState>) -> Result<Response> {
    let input = req.require_param("input")?;
    Response::json_value(&Echo::new(&input))
}
