//! Prompt builders, one per gateway call of a turn.

use sqlpilot_core::context::{LlmContext, PromptLabel, SystemBlock};
use sqlpilot_core::messages::Message;
use sqlpilot_core::tools::ToolDefinition;

/// System blocks plus messages for one call.
#[derive(Clone, Debug)]
pub struct Prompt {
    pub system: Vec<SystemBlock>,
    pub messages: Vec<Message>,
}

impl Prompt {
    fn single(label: PromptLabel, system: String, user: String) -> Self {
        Self {
            system: vec![SystemBlock::new(label, system)],
            messages: vec![Message::user(user)],
        }
    }

    pub fn into_context(self) -> LlmContext {
        LlmContext::new(self.system, self.messages)
    }

    pub fn into_context_with_tools(self, tools: &[ToolDefinition]) -> LlmContext {
        self.into_context().with_tools(tools.to_vec())
    }
}

pub fn persona(language: &str, question: &str, history: &str) -> Prompt {
    let system = format!(
        "You are a data analyst who answers questions by querying a SQL database through tools.\n\
         Work in this order:\n\
         1. Call `query_generation` to draft a SQL query for the question.\n\
         2. Call `validate_and_run_queries` with the drafted query.\n\
         3. If validation fails, follow its `next_action`: regenerate the query, or call \
         `schema_exploration` with a keyword describing the missing column or table first.\n\
         When `next_action` says to stop, or the query ran successfully, stop calling tools and \
         reply briefly. Reply in {language}."
    );
    let user = if history.is_empty() {
        format!("Question: {question}")
    } else {
        format!("Recent conversation:\n{history}\n\nQuestion: {question}")
    };
    Prompt::single(PromptLabel::Persona, system, user)
}

pub fn prompt_refinement(question: &str, today: &str, history: &str, language: &str) -> Prompt {
    let system = format!(
        "Rewrite the user's latest question so it can be answered from a database without the \
         conversation. Resolve pronouns and relative dates (today is {today}) using the history. \
         Keep the meaning; do not answer it. Write the rewritten question in {language}.\n\
         Reply with JSON only: {{\"refined_prompt\": \"...\"}}"
    );
    let user = format!(
        "<history>\n{}\n</history>\n<question>\n{question}\n</question>",
        if history.is_empty() { "(none)" } else { history }
    );
    Prompt::single(PromptLabel::PromptRefinement, system, user)
}

pub fn sample_selection(sample_inputs: &[String], question: &str) -> Prompt {
    let numbered = sample_inputs
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{i}: {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    let system = "You pick example questions that would help write SQL for a new question. \
                  Reply with the numbers of the useful examples, comma-separated (e.g. `0,3`), \
                  and nothing else. Reply with \"\" if none help."
        .to_string();
    let user = format!("<examples>\n{numbered}\n</examples>\n<question>\n{question}\n</question>");
    Prompt::single(PromptLabel::SampleSelection, system, user)
}

pub fn table_selection(
    table_summaries: &str,
    question: &str,
    samples: &str,
    failure_context: &str,
) -> Prompt {
    let system = "You choose the database tables needed to answer a question. Reply with the \
                  table names only, comma-separated, with no other text."
        .to_string();
    let user = format!(
        "<tables>\n{table_summaries}\n</tables>\n\
         <examples>\n{samples}\n</examples>\n\
         <previous_attempt>\n{failure_context}\n</previous_attempt>\n\
         <question>\n{question}\n</question>"
    );
    Prompt::single(PromptLabel::TableSelection, system, user)
}

pub struct GenerationInputs<'a> {
    pub samples: &'a str,
    pub dialect: &'a str,
    pub schemas: &'a str,
    pub language: &'a str,
    pub question: &'a str,
    pub failure_context: &'a str,
    pub task: &'a str,
}

pub fn query_generation(inputs: &GenerationInputs<'_>) -> Prompt {
    let GenerationInputs {
        samples,
        dialect,
        schemas,
        language,
        question,
        failure_context,
        task,
    } = inputs;
    let system = format!(
        "You write a single {dialect} query that answers the question using only the tables and \
         columns in the schema. If a previous attempt failed, fix the cause given in its failure \
         log. Name output columns in {language}.\n\
         Reply with JSON only: {{\"query\": \"...\", \"output_columns\": [\"...\"], \"reasoning\": \"...\"}}"
    );
    let user = format!(
        "<schema>\n{schemas}\n</schema>\n\
         <examples>\n{samples}\n</examples>\n\
         <previous_attempt>\n{failure_context}\n</previous_attempt>\n\
         <task>\n{task}\n</task>\n\
         <question>\n{question}\n</question>"
    );
    Prompt::single(PromptLabel::QueryGeneration, system, user)
}

pub fn query_validation(
    dialect: &str,
    plan: &str,
    query: &str,
    language: &str,
    question: &str,
) -> Prompt {
    let system = format!(
        "You review a {dialect} query against its execution plan before it runs. Return the query \
         unchanged if it is correct; otherwise return a corrected version. Output column names \
         are in {language} and must match the number of selected columns.\n\
         Reply with JSON only: {{\"final_query\": \"...\", \"output_columns\": [\"...\"]}}"
    );
    let user = format!(
        "<plan>\n{plan}\n</plan>\n<query>\n{query}\n</query>\n<question>\n{question}\n</question>"
    );
    Prompt::single(PromptLabel::QueryValidation, system, user)
}

pub fn answer_generation(language: &str, state_record: &str, question: &str) -> Prompt {
    let system = format!(
        "You report the outcome of a database question to the user in {language}. Base the answer \
         only on the session record: cite figures from `result_preview`, mention the saved files \
         `result_csv_file` and `sql_query_file` when present, and if `success` is false explain \
         what failed using `failure_log`."
    );
    let user = format!("<session_record>\n{state_record}\n</session_record>\n<question>\n{question}\n</question>");
    Prompt::single(PromptLabel::AnswerGeneration, system, user)
}
