//! # Voice Intents
//!
//! Tool calls returned by the voice model are decoded into [`VoiceIntent`]s
//! before anything touches the project. Calls with unknown names or
//! arguments that do not match the tool schema are dropped.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::analysis::llm::ToolCall;
use crate::stages::DiscoveryStage;
use crate::state::mutation::{InputMode, Mutation};
use crate::state::project::ProjectState;

pub const UPDATE_MAIN_CONTEXT: &str = "updateMainContext";
pub const UPDATE_REFINEMENT_ANSWER: &str = "updateRefinementAnswer";
pub const SWITCH_MODULE: &str = "switchModule";

/// Reply spoken when the model calls tools without saying anything
pub const DEFAULT_ACKNOWLEDGEMENT: &str = "Got it. I've updated the project details.";

/// How dictated text is combined with the current input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Replace,
    Append,
}

impl From<ContextMode> for InputMode {
    fn from(mode: ContextMode) -> Self {
        match mode {
            ContextMode::Replace => InputMode::Replace,
            ContextMode::Append => InputMode::Append,
        }
    }
}

/// Arguments of `updateMainContext`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateMainContextArgs {
    /// Text to write into the stage input
    pub text: String,
    pub mode: ContextMode,
}

/// Arguments of `updateRefinementAnswer`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateRefinementAnswerArgs {
    /// Zero-based question index
    pub index: usize,
    pub text: String,
}

/// Arguments of `switchModule`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwitchModuleArgs {
    pub module: DiscoveryStage,
}

/// A validated change requested by voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceIntent {
    SetInput { text: String, mode: ContextMode },
    SetAnswer { index: usize, text: String },
    SwitchStage { stage: DiscoveryStage },
}

impl VoiceIntent {
    /// Decode a single tool call
    pub fn from_tool_call(call: &ToolCall) -> Result<Self, String> {
        let args = call.function.arguments.as_str();
        let decode_err = |e: serde_json::Error| format!("{}: {}", call.function.name, e);

        match call.function.name.as_str() {
            UPDATE_MAIN_CONTEXT => {
                let a: UpdateMainContextArgs = serde_json::from_str(args).map_err(decode_err)?;
                Ok(Self::SetInput {
                    text: a.text,
                    mode: a.mode,
                })
            }
            UPDATE_REFINEMENT_ANSWER => {
                let a: UpdateRefinementAnswerArgs =
                    serde_json::from_str(args).map_err(decode_err)?;
                Ok(Self::SetAnswer {
                    index: a.index,
                    text: a.text,
                })
            }
            SWITCH_MODULE => {
                let a: SwitchModuleArgs = serde_json::from_str(args).map_err(decode_err)?;
                Ok(Self::SwitchStage { stage: a.module })
            }
            other => Err(format!("unknown tool '{}'", other)),
        }
    }

    /// Decode every call in order, logging and skipping invalid ones
    pub fn decode_all(calls: &[ToolCall]) -> Vec<Self> {
        calls
            .iter()
            .filter_map(|call| match Self::from_tool_call(call) {
                Ok(intent) => Some(intent),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid voice tool call");
                    None
                }
            })
            .collect()
    }

    /// Mutation applying this intent to the current stage
    pub fn into_mutation(self, current_stage: DiscoveryStage) -> Mutation {
        match self {
            Self::SetInput { text, mode } => Mutation::SetInput {
                stage: current_stage,
                text,
                mode: mode.into(),
            },
            Self::SetAnswer { index, text } => Mutation::SetAnswer {
                stage: current_stage,
                index,
                text,
            },
            Self::SwitchStage { stage } => Mutation::SwitchStage(stage),
        }
    }
}

fn parameters<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}));
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

/// Tool definitions offered to the voice model
pub fn tool_definitions() -> Vec<Value> {
    vec![
        function_tool(
            UPDATE_MAIN_CONTEXT,
            "Update the primary text box for the project analysis.",
            parameters::<UpdateMainContextArgs>(),
        ),
        function_tool(
            UPDATE_REFINEMENT_ANSWER,
            "Answer a specific follow-up question.",
            parameters::<UpdateRefinementAnswerArgs>(),
        ),
        function_tool(
            SWITCH_MODULE,
            "Navigate to a different discovery stage.",
            parameters::<SwitchModuleArgs>(),
        ),
    ]
}

/// System prompt describing the current stage, its input and open questions
pub fn system_prompt(state: &ProjectState) -> String {
    let stage = state.current_stage;
    let data = state.current();

    let questions = if data.questions.is_empty() {
        "No refinement questions currently.".to_string()
    } else {
        let listed = data
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}: {}", i, q))
            .collect::<Vec<_>>()
            .join("\n");
        format!("Refinement Questions Available:\n{}", listed)
    };

    format!(
        "You are the Discovery Voice Assistant.\n\n\
         Current Module: {} ({})\n\
         Current Text Input: \"{}\"\n\
         {}\n\n\
         GOAL:\n\
         - Determine if the user is providing new info, answering a question, or switching modules.\n\
         - Respond concisely for text-to-speech.\n\
         - You MUST use one of the tools provided to update the app state.",
        stage,
        stage.config().title,
        data.input,
        questions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::llm::FunctionCall;

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "c".into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    #[test]
    fn test_decode_valid_calls() {
        assert_eq!(
            VoiceIntent::from_tool_call(&call(
                UPDATE_MAIN_CONTEXT,
                r#"{"text":"B2B only","mode":"append"}"#
            )),
            Ok(VoiceIntent::SetInput {
                text: "B2B only".into(),
                mode: ContextMode::Append
            })
        );
        assert_eq!(
            VoiceIntent::from_tool_call(&call(SWITCH_MODULE, r#"{"module":"KPI"}"#)),
            Ok(VoiceIntent::SwitchStage {
                stage: DiscoveryStage::Kpi
            })
        );
    }

    #[test]
    fn test_invalid_calls_skipped() {
        let calls = vec![
            call("deleteEverything", "{}"),
            call(SWITCH_MODULE, r#"{"module":"ROADMAP"}"#),
            call(UPDATE_REFINEMENT_ANSWER, r#"{"index":-1,"text":"x"}"#),
            call(UPDATE_MAIN_CONTEXT, "not json"),
            call(UPDATE_REFINEMENT_ANSWER, r#"{"index":2,"text":"Tiered"}"#),
        ];
        assert_eq!(
            VoiceIntent::decode_all(&calls),
            vec![VoiceIntent::SetAnswer {
                index: 2,
                text: "Tiered".into()
            }]
        );
    }

    #[test]
    fn test_tool_schemas() {
        let tools = tool_definitions();
        let names: Vec<_> = tools
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec![UPDATE_MAIN_CONTEXT, UPDATE_REFINEMENT_ANSWER, SWITCH_MODULE]);

        let params = &tools[0]["function"]["parameters"];
        assert!(params.get("$schema").is_none());
        assert_eq!(params["type"], "object");
        let required = params["required"].as_array().unwrap();
        assert!(required.contains(&json!("text")));
        assert!(required.contains(&json!("mode")));

        let module = serde_json::to_string(&tools[2]["function"]["parameters"]).unwrap();
        for stage in DiscoveryStage::ALL {
            assert!(module.contains(stage.as_str()));
        }
    }

    #[test]
    fn test_system_prompt_lists_questions() {
        let state = ProjectState::default().with_stage(DiscoveryStage::Domain, |s| {
            s.input = "EV chargers".into();
            s.questions = vec!["Who pays?".into(), "Where?".into()];
        });
        let prompt = system_prompt(&state);
        assert!(prompt.contains("Current Module: DOMAIN (Domain Strategy)"));
        assert!(prompt.contains("Current Text Input: \"EV chargers\""));
        assert!(prompt.contains("0: Who pays?\n1: Where?"));

        let empty = system_prompt(&ProjectState::default());
        assert!(empty.contains("No refinement questions currently."));
    }

    #[test]
    fn test_into_mutation_targets_current_stage() {
        let mutation = VoiceIntent::SetAnswer {
            index: 0,
            text: "A".into(),
        }
        .into_mutation(DiscoveryStage::Bod);
        assert_eq!(
            mutation,
            Mutation::SetAnswer {
                stage: DiscoveryStage::Bod,
                index: 0,
                text: "A".into()
            }
        );
    }
}
