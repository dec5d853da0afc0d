// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Evaluation prompt rendering.

const INPUT_PLACEHOLDERS: [&str; 2] = ["{{input}}", "{{user_input}}"];
const OUTPUT_PLACEHOLDERS: [&str; 3] = ["{{output}}", "{{ai_response}}", "{{response}}"];

/// Substitute trace input/output into an evaluator template.
///
/// A template with no `{{` at all gets both values appended, so the judge
/// always sees what it is scoring.
pub fn render(template: &str, input: &str, output: &str) -> String {
    if !template.contains("{{") {
        return format!("{}\n\n用户输入: {}\n\nAI 回复: {}", template, input, output);
    }

    let mut prompt = template.to_string();
    for placeholder in INPUT_PLACEHOLDERS {
        prompt = prompt.replace(placeholder, input);
    }
    for placeholder in OUTPUT_PLACEHOLDERS {
        prompt = prompt.replace(placeholder, output);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_replaces_every_alias() {
        let rendered = render(
            "Q: {{input}} / {{user_input}}\nA: {{output}} {{ai_response}} {{response}}",
            "why?",
            "because",
        );
        assert_eq!(rendered, "Q: why? / why?\nA: because because because");
    }

    #[test]
    fn test_unknown_placeholders_are_left_alone() {
        assert_eq!(render("{{context}} {{input}}", "x", "y"), "{{context}} x");
    }

    #[test]
    fn test_placeholder_free_template_gets_appended_block() {
        let rendered = render("Judge politeness.", "hi", "hello there");
        assert_eq!(rendered, "Judge politeness.\n\n用户输入: hi\n\nAI 回复: hello there");
    }

    proptest! {
        #[test]
        fn placeholder_free_templates_carry_both_values(
            template in "[^{]*",
            input in ".*",
            output in ".*",
        ) {
            let rendered = render(&template, &input, &output);
            prop_assert!(rendered.contains(&input));
            prop_assert!(rendered.contains(&output));
        }
    }
}
