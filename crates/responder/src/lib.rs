//! Auto-responder (component G) — a pure, deterministic function from
//! (latest assistant text, iteration index) to the next simulated human
//! turn. No I/O, no randomness: the choice-picking split below is seeded
//! by the iteration index so the same transcript always produces the
//! same synthesized reply.

use std::sync::LazyLock;

use regex::Regex;

static NUMBERED_CHOICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([0-9]+)[.)]").unwrap());
static LETTERED_CHOICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^\s*\[?([a-e])\]?[.)]").unwrap());
static YES_NO_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(should|would|do|does|is|are|can|could)\s+(i|you)\b").unwrap()
});
static OPEN_INTERROGATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)how should|what should|which approach").unwrap());
static ERROR_CUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(error|failed|cannot|unable|exception)\b").unwrap());
static COMPLETION_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(completed|finished|done|implemented|all tests pass|ready)\b").unwrap()
});
static TESTS_PASS_CUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)all tests pass|tests (?:all )?passed|test suite passed").unwrap());
static TESTS_FAIL_CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tests? (?:failed|failing|did not pass)|test suite failed").unwrap()
});

/// `latest_assistant_text` claims the test suite actually ran and passed —
/// distinct from the general completion cue, which also fires on vaguer
/// wording like "done" with no test run implied.
pub fn is_tests_pass_cue(text: &str) -> bool {
    TESTS_PASS_CUE.is_match(text)
}

/// `latest_assistant_text` claims the test suite ran and failed.
pub fn is_tests_fail_cue(text: &str) -> bool {
    TESTS_FAIL_CUE.is_match(text)
}

/// One matched line of a numbered or lettered choice list, in the order
/// it appeared in the assistant's text.
struct Choice {
    label: String,
}

fn find_choices(text: &str) -> Vec<Choice> {
    let mut choices: Vec<Choice> = NUMBERED_CHOICE
        .captures_iter(text)
        .map(|c| Choice {
            label: c[1].to_string(),
        })
        .collect();
    if choices.is_empty() {
        choices = LETTERED_CHOICE
            .captures_iter(text)
            .map(|c| Choice {
                label: c[1].to_uppercase(),
            })
            .collect();
    }
    choices
}

/// A question cue requires interrogative-inversion framing aimed at "I"
/// or "you" ("should I", "would you", "do you"...), not merely a
/// trailing `?` — plenty of open-ended prompts ("How should we structure
/// this?") also end in `?` and must fall through to the
/// open-interrogative branch instead.
fn has_question_cue(text: &str) -> bool {
    YES_NO_CUE.is_match(text)
}

/// 40% first option, 40% a middle option, 20% last option — deterministic
/// on `iteration` so replaying the same turn always picks the same
/// option (Open Question resolution: seed = iteration index).
fn pick_choice_index(count: usize, iteration: u32) -> usize {
    if count == 0 {
        return 0;
    }
    match iteration % 5 {
        0 | 1 => 0,
        2 | 3 => count / 2,
        _ => count - 1,
    }
}

/// Generate the next simulated human turn for `assistant_text`, evaluated
/// against the decision table in order; first match wins.
pub fn generate(assistant_text: &str, iteration: u32) -> String {
    let choices = find_choices(assistant_text);
    if !choices.is_empty() && has_question_cue(assistant_text) {
        let idx = pick_choice_index(choices.len(), iteration);
        return format!("Let's go with option {}. Please proceed.", choices[idx].label);
    }
    if has_question_cue(assistant_text) {
        return "Yes, please proceed with that.".to_string();
    }
    if OPEN_INTERROGATIVE.is_match(assistant_text) {
        return "Please use your best judgment based on best practices. Proceed.".to_string();
    }
    if ERROR_CUE.is_match(assistant_text) {
        return "I see the error. Please try an alternative approach and continue.".to_string();
    }
    if COMPLETION_CUE.is_match(assistant_text) {
        return "Great! Please confirm everything is complete and all tests pass.".to_string();
    }
    "Please continue.".to_string()
}

/// `false` only when the completion branch fired and no question cue is
/// present — avoids emitting a useless continuation after a clearly
/// terminal assistant turn when criteria analysis is unavailable.
pub fn should_continue(assistant_text: &str, max_iterations: u32, iteration: u32) -> bool {
    if iteration >= max_iterations {
        return false;
    }
    let choices_branch = !find_choices(assistant_text).is_empty() && has_question_cue(assistant_text);
    let completion_only = !choices_branch
        && !has_question_cue(assistant_text)
        && !OPEN_INTERROGATIVE.is_match(assistant_text)
        && !ERROR_CUE.is_match(assistant_text)
        && COMPLETION_CUE.is_match(assistant_text);
    !completion_only
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_choice_with_question_cue_picks_seeded_option() {
        let text = "Which should I do?\n1. Refactor\n2. Add tests\n3. Ship it\n";
        assert_eq!(generate(text, 0), "Let's go with option 1. Please proceed.");
        assert_eq!(generate(text, 2), "Let's go with option 2. Please proceed.");
        assert_eq!(generate(text, 4), "Let's go with option 3. Please proceed.");
    }

    #[test]
    fn lettered_choice_with_question_cue() {
        let text = "Do you want:\na) Option A\nb) Option B\n";
        assert_eq!(generate(text, 0), "Let's go with option A. Please proceed.");
    }

    #[test]
    fn yes_no_cue_without_a_choice_list() {
        assert_eq!(
            generate("Should I go ahead and deploy this?", 0),
            "Yes, please proceed with that."
        );
    }

    #[test]
    fn open_interrogative_prompts_best_judgment() {
        // Ends in '?' like most real prompts do — "should we" doesn't
        // match the yes/no cue (that's "should I"/"should you"), so this
        // falls through to the open-interrogative branch correctly.
        assert_eq!(
            generate("How should we structure the migration here?", 0),
            "Please use your best judgment based on best practices. Proceed."
        );
    }

    #[test]
    fn yes_no_cue_takes_priority_over_open_interrogative_on_overlap() {
        assert_eq!(
            generate("What should I prioritize next?", 0),
            "Yes, please proceed with that."
        );
    }

    #[test]
    fn error_cue_prompts_alternative_approach() {
        assert_eq!(
            generate("The build failed with a linker error.", 0),
            "I see the error. Please try an alternative approach and continue."
        );
    }

    #[test]
    fn completion_cue_prompts_confirmation() {
        assert_eq!(
            generate("All changes are implemented and ready for review.", 0),
            "Great! Please confirm everything is complete and all tests pass."
        );
    }

    #[test]
    fn otherwise_falls_back_to_continue() {
        assert_eq!(generate("Working on the next file.", 0), "Please continue.");
    }

    #[test]
    fn should_continue_is_false_only_for_unqualified_completion() {
        assert!(!should_continue("All done, tests pass.", 25, 3));
        assert!(should_continue("All done, tests pass. Should I open a PR?", 25, 3));
        assert!(should_continue("Still working through the error.", 25, 3));
    }

    #[test]
    fn should_continue_is_false_past_max_iterations() {
        assert!(!should_continue("Still working on it.", 10, 10));
    }

    #[test]
    fn tests_pass_and_fail_cues_are_distinct_from_the_general_completion_cue() {
        assert!(is_tests_pass_cue("All tests pass now."));
        assert!(is_tests_pass_cue("The test suite passed."));
        assert!(!is_tests_pass_cue("Done, the feature is implemented."));

        assert!(is_tests_fail_cue("Two tests failed after the refactor."));
        assert!(is_tests_fail_cue("The test suite failed on CI."));
        assert!(!is_tests_fail_cue("All tests pass now."));
    }

    #[test]
    fn pick_choice_index_matches_the_40_40_20_split() {
        let counts = (0..5).map(|i| pick_choice_index(4, i)).collect::<Vec<_>>();
        assert_eq!(counts, vec![0, 0, 2, 2, 3]);
    }
}
