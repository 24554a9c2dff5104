//! Parsers for LLM responses.
//!
//! Extraction output is a list of tuple-delimited records:
//!
//! ```text
//! ("entity"<|>ACME<|>organization<|>A maker)##
//! ("relationship"<|>ACME<|>BOLT<|>buys from<|>supply, parts<|>8)##
//! <|COMPLETE|>
//! ```
//!
//! Relationship records carry either five fields (weight last) or six
//! (keywords, then weight).

use regex::Regex;

use crate::error::{GraphError, Result};
use crate::types::community::CommunityReport;
use crate::types::extraction::{RawEntity, RawExtraction, RawRelation};

pub const TUPLE_DELIMITER: &str = "<|>";
pub const RECORD_DELIMITER: &str = "##";
pub const COMPLETION_DELIMITER: &str = "<|COMPLETE|>";
pub const ENTITY_INDEX_DELIMITER: &str = "<|>";
pub const RESOLUTION_RESULT_DELIMITER: &str = "&&";

/// Parse tuple-delimited extraction records. Malformed records are ignored.
pub fn parse_extraction(response: &str) -> RawExtraction {
    let mut raw = RawExtraction::new();
    let response = response.replace(COMPLETION_DELIMITER, RECORD_DELIMITER);

    for record in response.split(RECORD_DELIMITER) {
        let record = record.trim();
        let record = record.strip_prefix('(').unwrap_or(record);
        let record = record.strip_suffix(')').unwrap_or(record);
        let fields: Vec<&str> = record.split(TUPLE_DELIMITER).map(clean_field).collect();

        match fields.first().map(|f| f.to_ascii_lowercase()).as_deref() {
            Some("entity") if fields.len() >= 4 => {
                raw.entities.push(RawEntity::new(fields[1], fields[2], fields[3]));
            }
            Some("relationship") if fields.len() >= 5 => {
                let mut relation = RawRelation::new(fields[1], fields[2], fields[3]);
                if fields.len() >= 6 {
                    relation = relation.with_keywords(fields[4].split(',').map(str::trim));
                }
                if let Some(weight) = fields.last().and_then(|w| w.parse::<f64>().ok()) {
                    relation = relation.with_weight(weight);
                }
                raw.relations.push(relation);
            }
            _ => {}
        }
    }
    raw
}

/// Parse batched same-entity answers.
///
/// Each record looks like `For Question <|>3<|>, &&yes&&, ...`. Returns one
/// slot per question: `Some(true)` for yes, `Some(false)` for no, `None`
/// when the question went unanswered.
pub fn parse_judgments(response: &str, questions: usize) -> Vec<Option<bool>> {
    let mut answers = vec![None; questions];
    let Some((index_re, answer_re)) = judgment_patterns() else {
        return answers;
    };

    for record in response.split(RECORD_DELIMITER) {
        let Some(index) = index_re
            .captures(record)
            .and_then(|c| c[1].parse::<usize>().ok())
        else {
            continue;
        };
        if index == 0 || index > questions {
            continue;
        }
        let Some(answer) = answer_re.captures(record) else {
            continue;
        };
        answers[index - 1] = match answer[1].to_ascii_lowercase().as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        };
    }
    answers
}

fn judgment_patterns() -> Option<(Regex, Regex)> {
    let index = Regex::new(&format!(
        r"{0}\s*(\d+)\s*{0}",
        regex::escape(ENTITY_INDEX_DELIMITER)
    ))
    .ok()?;
    let answer = Regex::new(&format!(
        r"{0}\s*([a-zA-Z]+)\s*{0}",
        regex::escape(RESOLUTION_RESULT_DELIMITER)
    ))
    .ok()?;
    Some((index, answer))
}

/// Parse a JSON community report, tolerating code fences and chatter
/// around the object.
pub fn parse_report(response: &str) -> Result<CommunityReport> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &response[s..=e],
        _ => {
            return Err(GraphError::llm(format!(
                "community report has no JSON object: {}",
                truncate(response, 200)
            )))
        }
    };
    let report: CommunityReport = serde_json::from_str(json).map_err(GraphError::llm)?;
    if report.title.trim().is_empty() {
        return Err(GraphError::llm("community report has an empty title"));
    }
    Ok(report)
}

fn clean_field(field: &str) -> &str {
    field
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c.is_control())
        .trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extraction_records() {
        let response = r#"("entity"<|>"Acme"<|>"organization"<|>"A maker")##
("entity"<|>Bolt<|>organization<|>A supplier)##
("relationship"<|>"Acme"<|>"Bolt"<|>"buys from"<|>"supply, parts"<|>8)##
("relationship"<|>Acme<|>Bolt<|>partners<|>3)##
("entity"<|>broken)##
<|COMPLETE|>"#;

        let raw = parse_extraction(response);
        assert_eq!(raw.entities.len(), 2);
        assert_eq!(raw.entities[0].name, "Acme");
        assert_eq!(raw.relations.len(), 2);
        assert_eq!(raw.relations[0].weight, 8.0);
        assert_eq!(raw.relations[0].keywords, vec!["supply", "parts"]);
        assert_eq!(raw.relations[1].weight, 3.0);
        assert!(raw.relations[1].keywords.is_empty());
    }

    #[test]
    fn test_parse_judgments() {
        let response = "For Question <|>1<|>, &&yes&&, organization A and B are the same.##\
                        For Question <|>2<|>, &&no&&, they are different.##\
                        For Question <|>9<|>, &&yes&&";
        assert_eq!(parse_judgments(response, 3), vec![Some(true), Some(false), None]);
    }

    #[test]
    fn test_parse_report_inside_fences() {
        let response = "```json\n{\"title\": \"Acme\", \"summary\": \"s\", \"rating\": 6.5,\n\
                        \"findings\": [{\"summary\": \"f\", \"explanation\": \"e\"}]}\n```";
        let report = parse_report(response).unwrap();
        assert_eq!(report.title, "Acme");
        assert_eq!(report.findings.len(), 1);

        assert!(parse_report("no json here").is_err());
    }
}
