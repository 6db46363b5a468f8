use qizhen_flow::{Context, FlowError};
use serde::de::DeserializeOwned;

use crate::models::GenerationParams;

/// Keys the tasks use to pass values through the graph context.
pub mod keys {
    pub const USER_INPUT: &str = "user_input";
    pub const GENERATION_PARAMS: &str = "generation_params";
    pub const REVEAL_REQUESTED: &str = "reveal_requested";
    pub const PARSED_INTENT: &str = "parsed_intent";
    pub const RETRIEVED_SNIPPETS: &str = "retrieved_snippets";
    /// Questions generated earlier in the same session
    pub const CACHED_OUTPUT: &str = "cached_output";
    pub const GENERATED_OUTPUT: &str = "generated_output";
    pub const GRAPH_TOPIC: &str = "graph_topic";
    /// Stored dialogue when continuing, absent on the first turn
    pub const DIALOGUE_STATE: &str = "dialogue_state";
    pub const DIALOGUE_TOPIC: &str = "dialogue_topic";
    pub const DIALOGUE_CHARACTER: &str = "dialogue_character";
}

pub const QUESTION_TEMPERATURE: f32 = 0.7;
pub const ANSWER_TEMPERATURE: f32 = 0.3;
pub const GRAPH_TEMPERATURE: f32 = 0.5;
pub const DIALOGUE_TEMPERATURE: f32 = 0.8;
pub const INTENT_TEMPERATURE: f32 = 0.8;

/// Read a value an earlier task must have stored.
pub fn required<T: DeserializeOwned>(context: &Context, key: &str) -> qizhen_flow::Result<T> {
    context
        .get_sync(key)
        .ok_or_else(|| FlowError::ContextError(format!("{key} not found in context")))
}

pub fn generation_params(context: &Context) -> GenerationParams {
    context
        .get_sync(keys::GENERATION_PARAMS)
        .unwrap_or_default()
}
