//! Prompt templates for the chat-backed graph LLM.
//!
//! Templates use `{placeholder}` substitution; [`fill`] replaces every
//! placeholder it is given and leaves the rest alone.

use crate::llm::parse::{
    COMPLETION_DELIMITER, ENTITY_INDEX_DELIMITER, RECORD_DELIMITER, RESOLUTION_RESULT_DELIMITER,
    TUPLE_DELIMITER,
};
use crate::types::community::CommunityContext;
use crate::types::extraction::ExtractionRequest;
use crate::types::graph::{description_parts, Entity};

pub const EXTRACTION_PROMPT: &str = r#"-Goal-
Given a text document and a list of entity types, identify all entities of those types in the text and all relationships among the identified entities.

-Steps-
1. Identify all entities. For each identified entity, extract:
- entity_name: name of the entity, capitalized
- entity_type: one of the following types: [{entity_types}]
- entity_description: comprehensive description of the entity's attributes and activities
Format each entity as ("entity"{tuple_delimiter}<entity_name>{tuple_delimiter}<entity_type>{tuple_delimiter}<entity_description>)

2. From the entities identified in step 1, identify all pairs of (source_entity, target_entity) that are *clearly related* to each other. For each pair, extract:
- source_entity: name of the source entity, as identified in step 1
- target_entity: name of the target entity, as identified in step 1
- relationship_description: why the source and target entity are related
- relationship_keywords: comma separated high-level keywords summarizing the relationship
- relationship_strength: a numeric score from 1 to 10
Format each relationship as ("relationship"{tuple_delimiter}<source_entity>{tuple_delimiter}<target_entity>{tuple_delimiter}<relationship_description>{tuple_delimiter}<relationship_keywords>{tuple_delimiter}<relationship_strength>)

3. Return output in {language} as a single list of all entities and relationships identified in steps 1 and 2. Use **{record_delimiter}** as the list delimiter.

4. When finished, output {completion_delimiter}

-Real Data-
Entity types: {entity_types}
Text: {input_text}
Output:"#;

pub const CONTINUE_PROMPT: &str = "MANY entities and relationships were missed in the last extraction. \
Add them below using the same format:";

pub const LOOP_PROMPT: &str = "It appears some entities and relationships may have still been missed. \
Answer YES | NO if there are still entities or relationships that need to be added.";

pub const RESOLUTION_PROMPT: &str = r#"-Goal-
Please answer the following questions about whether two entities are the same real-world entity.

-Questions-
{input_text}

-Output format-
For each question, output one record in the form:
For Question {entity_index_delimiter}<question number>{entity_index_delimiter}, {resolution_result_delimiter}<yes or no>{resolution_result_delimiter}, <short reason>
Separate records with {record_delimiter}.
"#;

pub const COMMUNITY_REPORT_PROMPT: &str = r#"You are an analyst writing a report about a community of related entities in a knowledge graph.

Write a report with:
- title: a short, specific name for the community, naming its key entities
- summary: an executive summary of the community's structure and how its entities relate
- rating: a float between 0 and 10 for how significant the community is
- rating_explanation: one sentence explaining the rating
- findings: 5-10 key insights, each with a short "summary" and a grounded "explanation"

Return only a JSON object:
{"title": "...", "summary": "...", "rating": 0.0, "rating_explanation": "...", "findings": [{"summary": "...", "explanation": "..."}]}

-Entities-
{entities}

-Relationships-
{relationships}
"#;

pub const SUMMARIZE_DESCRIPTIONS_PROMPT: &str = r#"You are responsible for generating a comprehensive summary of the data provided below.
Given an entity and a list of descriptions, all related to the same entity, concatenate all of these into a single, comprehensive description. Resolve any contradictions. Write in the third person and include the entity name.

Entity: {entity_name}
Descriptions:
{description_list}

Output:"#;

/// Replace `{key}` placeholders.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

pub fn extraction_prompt(request: &ExtractionRequest<'_>) -> String {
    let entity_types = request.entity_types.join(", ");
    fill(
        EXTRACTION_PROMPT,
        &[
            ("entity_types", &entity_types),
            ("language", request.language),
            ("tuple_delimiter", TUPLE_DELIMITER),
            ("record_delimiter", RECORD_DELIMITER),
            ("completion_delimiter", COMPLETION_DELIMITER),
            ("input_text", request.text),
        ],
    )
}

/// One question per pair, numbered from 1.
pub fn resolution_prompt(pairs: &[(Entity, Entity)]) -> String {
    let entity_type = pairs
        .first()
        .map(|(a, _)| a.entity_type.to_lowercase())
        .unwrap_or_else(|| "entity".to_string());

    let mut questions = vec![format!(
        "When determining whether two {entity_type}s are the same, focus only on critical properties and overlook noisy factors."
    )];
    for (i, (a, b)) in pairs.iter().enumerate() {
        questions.push(format!(
            "Question {}: name of {entity_type} A is {}, name of {entity_type} B is {}",
            i + 1,
            a.name,
            b.name
        ));
    }

    fill(
        RESOLUTION_PROMPT,
        &[
            ("input_text", &questions.join("\n")),
            ("entity_index_delimiter", ENTITY_INDEX_DELIMITER),
            ("resolution_result_delimiter", RESOLUTION_RESULT_DELIMITER),
            ("record_delimiter", RECORD_DELIMITER),
        ],
    )
}

pub fn community_prompt(context: &CommunityContext) -> String {
    let mut entities = String::from("id,entity,description\n");
    for (i, e) in context.entities.iter().enumerate() {
        let description = description_parts(&e.description).collect::<Vec<_>>().join(" ");
        entities.push_str(&format!("{},{},{}\n", i + 1, e.name, csv_field(&description)));
    }

    let mut relationships = String::from("id,source,target,description\n");
    for (i, r) in context.relationships.iter().enumerate() {
        let description = description_parts(&r.description).collect::<Vec<_>>().join(" ");
        relationships.push_str(&format!(
            "{},{},{},{}\n",
            i + 1,
            r.source,
            r.target,
            csv_field(&description)
        ));
    }

    fill(
        COMMUNITY_REPORT_PROMPT,
        &[("entities", &entities), ("relationships", &relationships)],
    )
}

pub fn summarize_descriptions_prompt(name: &str, parts: &[String]) -> String {
    let list = parts
        .iter()
        .map(|p| format!("- {p}"))
        .collect::<Vec<_>>()
        .join("\n");
    fill(
        SUMMARIZE_DESCRIPTIONS_PROMPT,
        &[("entity_name", name), ("description_list", &list)],
    )
}

fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_leaves_unknown_placeholders() {
        assert_eq!(fill("{a} and {b}", &[("a", "x")]), "x and {b}");
    }

    #[test]
    fn test_resolution_prompt_numbers_questions() {
        let pairs = vec![
            (
                Entity::new("Acme Corp", "organization", "a"),
                Entity::new("Acme Corporation", "organization", "b"),
            ),
            (Entity::new("Bolt", "organization", "c"), Entity::new("Bolt Inc", "organization", "d")),
        ];
        let prompt = resolution_prompt(&pairs);
        assert!(prompt.contains("Question 1: name of organization A is ACME CORP"));
        assert!(prompt.contains("Question 2:"));
        assert!(prompt.contains("<|><question number><|>"));
    }

    #[test]
    fn test_extraction_prompt_has_text_and_types() {
        let types = vec!["person".to_string(), "geo".to_string()];
        let request = ExtractionRequest {
            document_id: "d1",
            text: "Alice lives in Paris.",
            language: "English",
            entity_types: &types,
        };
        let prompt = extraction_prompt(&request);
        assert!(prompt.contains("Alice lives in Paris."));
        assert!(prompt.contains("[person, geo]"));
        assert!(!prompt.contains("{tuple_delimiter}"));
    }
}
