use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::venue::VenueKey;

use super::{AdvisoryError, AdvisoryResult};

/// 顾问服务输出的严格结构，任何多余或缺失字段都会导致拒收。
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposalPayload {
    allocations: Vec<ProposedEntryPayload>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposedEntryPayload {
    #[serde_as(as = "DisplayFromStr")]
    venue: VenueKey,
    percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposedEntry {
    pub venue: VenueKey,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryProposal {
    pub entries: Vec<ProposedEntry>,
    pub reasoning: Option<String>,
    pub confidence: Option<f64>,
}

/// 截取文本中第一个 `{` 到最后一个 `}` 之间的内容。
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 解析顾问输出；格式不符即失败关闭，绝不猜测。
pub fn parse_proposal(text: &str) -> AdvisoryResult<AdvisoryProposal> {
    let body = extract_json_object(text)
        .ok_or_else(|| AdvisoryError::Malformed("no JSON object in advisory output".to_string()))?;
    let payload: ProposalPayload = serde_json::from_str(body)
        .map_err(|err| AdvisoryError::Malformed(format!("schema mismatch: {err}")))?;

    if payload.allocations.is_empty() {
        return Err(AdvisoryError::Malformed("allocations is empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(payload.allocations.len());
    for entry in payload.allocations {
        if !entry.percentage.is_finite() || entry.percentage < 0.0 || entry.percentage > 100.0 {
            return Err(AdvisoryError::Malformed(format!(
                "percentage {} for {} out of range",
                entry.percentage, entry.venue
            )));
        }
        if !seen.insert(entry.venue.clone()) {
            return Err(AdvisoryError::Malformed(format!(
                "duplicate venue {}",
                entry.venue
            )));
        }
        entries.push(ProposedEntry {
            venue: entry.venue,
            percentage: entry.percentage,
        });
    }

    if let Some(confidence) = payload.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(AdvisoryError::Malformed(format!(
                "confidence {confidence} out of range"
            )));
        }
    }

    Ok(AdvisoryProposal {
        entries,
        reasoning: payload.reasoning,
        confidence: payload.confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payload_wrapped_in_prose() {
        let text = r#"Here is my suggestion:
        {"allocations": [
            {"venue": "aave-v3:ethereum:0x1", "percentage": 60},
            {"venue": "yearn:arbitrum:0x2", "percentage": 40}
        ], "confidence": 0.8}
        Let me know."#;
        let proposal = parse_proposal(text).expect("proposal");
        assert_eq!(proposal.entries.len(), 2);
        assert_eq!(proposal.entries[1].venue, VenueKey::new("yearn", "arbitrum", "0x2"));
        assert_eq!(proposal.confidence, Some(0.8));
    }

    #[test]
    fn rejects_unknown_fields() {
        let text = r#"{"allocations": [{"venue": "aave:ethereum:0x1", "percentage": 100, "asset": "ETH"}]}"#;
        assert!(matches!(parse_proposal(text), Err(AdvisoryError::Malformed(_))));
    }

    #[test]
    fn rejects_missing_allocations_and_garbage() {
        assert!(parse_proposal(r#"{"reasoning": "hold"}"#).is_err());
        assert!(parse_proposal("no json here").is_err());
        assert!(parse_proposal("} backwards {").is_err());
    }

    #[test]
    fn rejects_bad_percentages_and_duplicates() {
        let negative = r#"{"allocations": [{"venue": "aave:ethereum:0x1", "percentage": -5}]}"#;
        assert!(parse_proposal(negative).is_err());

        let duplicate = r#"{"allocations": [
            {"venue": "aave:ethereum:0x1", "percentage": 50},
            {"venue": "AAVE:Ethereum:0x1", "percentage": 50}
        ]}"#;
        assert!(parse_proposal(duplicate).is_err());
    }

    #[test]
    fn rejects_unparseable_venue_key() {
        let text = r#"{"allocations": [{"venue": "aave-ethereum", "percentage": 100}]}"#;
        assert!(parse_proposal(text).is_err());
    }
}
