//! Prompt assembly for the agent and formatting passes.

use quarry_core::shape::OutputShape;
use quarry_core::tool::ToolRegistry;

/// Base prompt followed by the tool catalogue.
pub fn system_prompt(base: &str, tools: &ToolRegistry) -> String {
    let catalogue = tools.catalogue();
    if catalogue.is_empty() {
        base.to_string()
    } else {
        format!("{base}\n\n{catalogue}")
    }
}

/// The caller's query with the field instruction appended.
pub fn user_prompt(query: &str, shape: &OutputShape) -> String {
    let instruction = shape.instruction();
    if instruction.is_empty() {
        query.to_string()
    } else {
        format!("{query}\n\n{instruction}")
    }
}

/// System prompt of the formatting pass.
pub fn formatter_prompt(shape: &OutputShape) -> String {
    format!(
        "You convert an assistant's answer into JSON.\n\
         Reply with a single JSON object and nothing else, matching this shape:\n\
         {}\n\
         Use only facts stated in the answer. Use null for any field the answer does not provide.",
        shape.describe()
    )
}

/// Follow-up after an unusable formatting reply.
pub fn formatter_correction(reason: &str) -> String {
    format!(
        "That reply could not be used: {reason}. \
         Reply again with only the JSON object in the requested shape."
    )
}
