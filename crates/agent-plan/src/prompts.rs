//! Prompt templates for the planning loops
//!
//! Templates use MiniJinja syntax and are rendered against JSON variables.

use crate::error::{PlanError, Result};
use crate::store::{PlanStore, numbered};
use chrono::{DateTime, Utc};
use minijinja::Environment;
use serde_json::json;

/// System prompt of the initial planner
pub const PLANNER_SYSTEM: &str = r#"For the given objective, come up with a simple step by step plan. This plan should involve individual tasks without any user interaction, that if executed correctly will yield the correct answer. Do not add any superfluous steps. The result of the final step should be the final answer. Make sure that each step has all the information needed - do not skip steps.

Output should be a step-by-step list in JSON format. For example,
```json
{"steps": ["Perform the first task",
           "Search the answer",
           "Give the final answer"]}
```
Escape any character that would prevent parsing the JSON object."#;

const REPLANNER: &str = r#"For the given objective, come up with a simple step by step plan. This plan should involve individual tasks without any user interaction, that if executed correctly will yield the correct answer. Do not add any superfluous steps. The result of the final step should be the final answer. Make sure that each step has all the information needed - do not skip steps.

Your objective was this:
{{ task }}

Your original plan was this:
{{ plan }}

You have currently done the follow steps:
{% for past in past_steps %}{{ loop.index }}. {{ past.step }}
   Result: {{ past.result }}
{% else %}(none)
{% endfor %}
If no more steps are needed and you can return to the user, then respond with that. Otherwise, update your plan accordingly. Only add steps to the plan that still NEED to be done. Do not return previously done steps as part of the plan.

If you want to respond to user, output should be in JSON format. For example,
```json
{"response": "Final answer to the user."}
```

If you need to further use tools to get the answer, output should be a step-by-step list in JSON format. For example,
```json
{"steps": ["Load data",
           "Process data",
           "Save data"]}
```
Ensure escaping any character that would prevent parsing the answer as a JSON object."#;

const STEP: &str = "For the following plan:
{{ plan }}

You are tasked with executing step 1, {{ step }}.";

const ACTOR_SYSTEM: &str = "You are expert researcher.
Current time: {{ time }}

1. {{ first_instruction }}
2. Reflect and critique your answer. Be severe to maximize improvement.
3. Recommend search queries to research information and improve your answer.";

const ACTOR_REMINDER: &str = "\n\n<system>Reflect on the user's original question and the actions taken thus far. Respond using the {{ function_name }} tool.</reminder>";

/// First instruction of the drafting actor
pub const INITIAL_ANSWER_INSTRUCTION: &str = "Provide a detailed ~250 word answer.";

/// First instruction of the revising actor
pub const REVISE_INSTRUCTIONS: &str = r#"Revise your previous answer using the new information.
    - You should use the previous critique to add important information to your answer.
        - You MUST include numerical citations in your revised answer to ensure it can be verified.
        - Add a "References" section to the bottom of your answer (which does not count towards the word limit). In form of:
            - [1] https://example.com
            - [2] https://example.com
    - You should use the previous critique to remove superfluous information from your answer and make SURE it is not more than 250 words.
"#;

const REWOO_TOOLS: &str = "For each step, indicate which external tool together with tool input to retrieve evidence. You can store the evidence into a variable #E that can be called by later tools. (Step, #E = Tool[tool input])

Tools can be one of the following:
(1) WebSearch[input]: Worker that searches results from web. Useful when you need to find short
and succinct answers about a specific topic. The input should be a search query.
(2) LLM[input]: A pretrained LLM like yourself. Useful when you need to act with general
world knowledge and common sense. Prioritize it when you are confident in solving the problem
yourself. Input can be any instruction.

For example,
Task: Thomas, Toby, and Rebecca worked a total of 157 hours in one week. Thomas worked x
hours. Toby worked 10 hours less than twice what Thomas worked, and Rebecca worked 8 hours
less than Toby. How many hours did Rebecca work?
Step: Given Thomas worked x hours, translate the problem into algebraic expressions and solve
with Wolfram Alpha. #E = WolframAlpha[Solve x + (2x − 10) + ((2x − 10) − 8) = 157]

Begin!
Describe your step with rich details. Each Step should be followed by only one #E.";

const REWOO_PLAN: &str = "For the following task, make the first step of a plan that can solve the problem. {{ tools }}

Task: {{ task }}";

const REWOO_REVIEW: &str = "For the following task and the last result, make the next step of a plan that can solve the problem. {{ tools }}

Task: {{ task }}

Last step: {{ step }}

Results:
{{ results }}";

const REWOO_SOLVE: &str = "Solve the following task or problem. To solve the problem, we have made step-by-step plan and retrieved corresponding results to each step. Use them with caution since long result might contain irrelevant information.

Now solve the question or task according to provided results. Respond with the answer directly with no extra words.

Task: {{ task }}

Results: {{ results }}

Response:";

fn render(name: &'static str, template: &str, vars: &serde_json::Value) -> Result<String> {
    let env = Environment::new();
    let value = minijinja::Value::from_serialize(vars);
    env.render_str(template, value)
        .map_err(|e| PlanError::Prompt {
            name,
            detail: e.to_string(),
        })
}

/// Replanner prompt for the current run state
pub fn replanner(store: &PlanStore) -> Result<String> {
    let past_steps: Vec<_> = store
        .past_steps()
        .iter()
        .map(|p| json!({"step": p.step, "result": p.result_text()}))
        .collect();
    render(
        "replanner",
        REPLANNER,
        &json!({
            "task": store.task(),
            "plan": store.numbered_plan(),
            "past_steps": past_steps,
        }),
    )
}

/// Instruction handed to the step executor
pub fn step_instruction(plan: &[String], step: &str) -> Result<String> {
    render("step", STEP, &json!({"plan": numbered(plan), "step": step}))
}

/// System prompt of the reflection actor
pub fn actor_system(first_instruction: &str, now: DateTime<Utc>) -> Result<String> {
    render(
        "actor",
        ACTOR_SYSTEM,
        &json!({"time": now.to_rfc3339(), "first_instruction": first_instruction}),
    )
}

/// Trailing user reminder naming the tool the actor must call
pub fn actor_reminder(function_name: &str) -> Result<String> {
    render(
        "actor_reminder",
        ACTOR_REMINDER,
        &json!({"function_name": function_name}),
    )
}

/// First-step prompt of the ReWOO planner
pub fn rewoo_plan(task: &str) -> Result<String> {
    render(
        "rewoo_plan",
        REWOO_PLAN,
        &json!({"tools": REWOO_TOOLS, "task": task}),
    )
}

/// Next-step prompt of the ReWOO reviewer
pub fn rewoo_review(task: &str, step: &str, results: &[String]) -> Result<String> {
    render(
        "rewoo_review",
        REWOO_REVIEW,
        &json!({
            "tools": REWOO_TOOLS,
            "task": task,
            "step": step,
            "results": results.join("\n- "),
        }),
    )
}

/// Prompt of the ReWOO solver
pub fn rewoo_solve(task: &str, results: &[String]) -> Result<String> {
    render(
        "rewoo_solve",
        REWOO_SOLVE,
        &json!({"task": task, "results": results.join("\n- ")}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StepResult;
    use chrono::TimeZone;

    #[test]
    fn test_step_instruction() {
        let plan = vec!["Find the capital".to_string(), "Answer".to_string()];
        let prompt = step_instruction(&plan, "Find the capital").unwrap();
        assert_eq!(
            prompt,
            "For the following plan:\n1. Find the capital\n2. Answer\n\nYou are tasked with executing step 1, Find the capital."
        );
    }

    #[test]
    fn test_replanner_includes_progress() {
        let mut store = PlanStore::new("What is the capital of France?");
        store.replace_plan(vec!["Answer".to_string()]);
        store.record(StepResult::success("Look up", "Paris"));
        store.record(StepResult::failure("Verify", "timeout"));

        let prompt = replanner(&store).unwrap();
        assert!(prompt.contains("Your objective was this:\nWhat is the capital of France?"));
        assert!(prompt.contains("1. Answer"));
        assert!(prompt.contains("1. Look up\n   Result: Paris"));
        assert!(prompt.contains("2. Verify\n   Result: Error: timeout"));
        assert!(prompt.contains("{\"response\": \"Final answer to the user.\"}"));
    }

    #[test]
    fn test_replanner_without_progress() {
        let prompt = replanner(&PlanStore::new("t")).unwrap();
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_actor_prompts() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let system = actor_system(INITIAL_ANSWER_INSTRUCTION, now).unwrap();
        assert!(system.starts_with("You are expert researcher.\nCurrent time: 2024-05-01T12:00:00+00:00"));
        assert!(system.contains("1. Provide a detailed ~250 word answer."));

        let reminder = actor_reminder("ReviseAnswer").unwrap();
        assert!(reminder.starts_with("\n\n<system>"));
        assert!(reminder.ends_with("Respond using the ReviseAnswer tool.</reminder>"));
    }

    #[test]
    fn test_rewoo_prompts() {
        let plan = rewoo_plan("Who won?").unwrap();
        assert!(plan.contains("(1) WebSearch[input]"));
        assert!(plan.ends_with("Task: Who won?"));

        let results = vec!["a".to_string(), "b".to_string()];
        let review = rewoo_review("Who won?", "Search", &results).unwrap();
        assert!(review.contains("Last step: Search"));
        assert!(review.ends_with("a\n- b"));

        let solve = rewoo_solve("Who won?", &results).unwrap();
        assert!(solve.contains("Results: a\n- b"));
        assert!(solve.ends_with("Response:"));
    }
}
